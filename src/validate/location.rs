//! County/parish jurisdiction validators.
//!
//! Grounded on `elm/ords/utilities/validation.py`: `Validator` (base
//! class with a JSON-mode system message and a `_parse_output` hook),
//! `URLValidator`/`CountyJurisdictionValidator`/`CountyNameValidator`,
//! and `CountyValidator.check`'s combined jurisdiction/URL/heuristic/name
//! logic with length-weighted per-page voting.

use crate::document::{Document, Location};
use crate::llm::StructuredLlmCaller;

const DEFAULT_SCORE_THRESH: f64 = 0.8;

/// A single-question validator: submits `content` against a system
/// message templated with `{county}`/`{state}`, and decides pass/fail
/// from the parsed JSON reply. `add_json_instructions_if_needed` is
/// applied inside `StructuredLlmCaller`, so system messages here are
/// written in plain English without worrying about that boilerplate.
trait Validator {
    fn system_message(&self, county: &str, state: &str) -> String;
    fn passes(&self, props: &serde_json::Value) -> bool;

    fn check<'a>(
        &'a self,
        caller: &'a StructuredLlmCaller,
        content: &'a str,
        county: &'a str,
        state: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<bool>> + Send + 'a>>
    where
        Self: Sync,
    {
        Box::pin(async move {
            if content.is_empty() {
                return Ok(false);
            }
            let sys_msg = self.system_message(county, state);
            let props = caller.call(&sys_msg, content).await?;
            Ok(self.passes(&props))
        })
    }
}

struct UrlValidator;

impl Validator for UrlValidator {
    fn system_message(&self, county: &str, state: &str) -> String {
        format!(
            "You extract structured data from a URL. Your JSON file must \
             include exactly two keys. The first key is 'correct_county', \
             which is a boolean that is set to true if the URL mentions \
             {county} County in some way. Do not infer based on \
             information in the URL about any US state, city, township, \
             or otherwise. False if not sure. The second key is \
             'correct_state', which is a boolean that is set to true if \
             the URL mentions {state} State in some way. Do not infer \
             based on information in the URL about any US county, city, \
             township, or otherwise. False if not sure."
        )
    }

    fn passes(&self, props: &serde_json::Value) -> bool {
        props["correct_county"].as_bool().unwrap_or(false)
            && props["correct_state"].as_bool().unwrap_or(false)
    }
}

struct CountyJurisdictionValidator;

impl Validator for CountyJurisdictionValidator {
    fn system_message(&self, county: &str, _state: &str) -> String {
        format!(
            "You extract structured data from legal text. Your JSON file \
             must include exactly three keys. The first key is 'x', which \
             is a boolean that is set to true if the text excerpt \
             explicitly mentions that the regulations within apply to a \
             jurisdiction other than {county} County (i.e. they apply to \
             a subdivision like a township or a city, or they apply more \
             broadly, like to a state or the full country). False if the \
             regulations in the text apply to {county} County or if there \
             is not enough information to determine the answer. The \
             second key is 'y', which is a boolean that is set to true if \
             the text excerpt explicitly mentions that the regulations \
             within apply to more than one county. False if the \
             regulations in the text excerpt apply to a single county \
             only or if there is not enough information to determine the \
             answer. The third key is 'explanation', a short string \
             explaining any true answers above."
        )
    }

    fn passes(&self, props: &serde_json::Value) -> bool {
        let x = props["x"].as_bool().unwrap_or(false);
        let y = props["y"].as_bool().unwrap_or(false);
        !(x || y)
    }
}

struct CountyNameValidator;

impl Validator for CountyNameValidator {
    fn system_message(&self, county: &str, state: &str) -> String {
        format!(
            "You extract structured data from legal text. Your JSON file \
             must include exactly three keys. The first key is \
             'wrong_county', which is a boolean that is set to true if \
             the legal text is not for {county} County. Do not infer \
             based on any information about any US state, city, township, \
             or otherwise. False if the text applies to {county} County \
             or if there is not enough information to determine the \
             answer. The second key is 'wrong_state', which is a boolean \
             that is set to true if the legal text is not for a county in \
             {state} State. Do not infer based on any information about \
             any US county, city, township, or otherwise. False if the \
             text applies to a county in {state} State or if there is not \
             enough information to determine the answer. The third key is \
             'explanation', a short string explaining any true answers \
             above."
        )
    }

    fn passes(&self, props: &serde_json::Value) -> bool {
        let wrong_county = props["wrong_county"].as_bool().unwrap_or(false);
        let wrong_state = props["wrong_state"].as_bool().unwrap_or(false);
        !(wrong_county || wrong_state)
    }
}

/// Weighted-vote average of per-page boolean checks, weighted by page
/// character length, exactly matching `_weighted_vote`.
fn weighted_vote(verdicts: &[bool], pages: &[String]) -> f64 {
    if pages.is_empty() {
        return 0.0;
    }
    let weights: Vec<f64> = pages.iter().map(|p| p.len() as f64).collect();
    let total_weight: f64 = weights.iter().sum();
    if total_weight == 0.0 {
        return 0.0;
    }
    let total: f64 = verdicts
        .iter()
        .zip(weights.iter())
        .map(|(&v, &w)| if v { w } else { 0.0 })
        .sum();
    total / total_weight
}

async fn validator_check_across_pages(
    validator: &dyn Validator,
    caller: &StructuredLlmCaller,
    pages: &[String],
    county: &str,
    state: &str,
    score_thresh: f64,
) -> anyhow::Result<bool> {
    let mut verdicts = Vec::with_capacity(pages.len());
    for page in pages {
        verdicts.push(validator.check(caller, page, county, state).await?);
    }
    Ok(weighted_vote(&verdicts, pages) > score_thresh)
}

fn heuristic_check_for_county_and_state(doc: &Document, county: &str, state: &str) -> bool {
    let county_lower = county.to_lowercase();
    let state_lower = state.to_lowercase();
    let found_county = doc.pages().iter().any(|p| p.to_lowercase().contains(&county_lower));
    if !found_county {
        return false;
    }
    doc.pages().iter().any(|p| p.to_lowercase().contains(&state_lower))
}

/// Combines jurisdiction, URL, heuristic, and LLM name checks into the
/// single pass/fail decision used by the location pipeline. Grounded on
/// `CountyValidator.check`.
pub struct CountyValidator {
    score_thresh: f64,
}

impl Default for CountyValidator {
    fn default() -> Self {
        Self {
            score_thresh: DEFAULT_SCORE_THRESH,
        }
    }
}

impl CountyValidator {
    pub fn new(score_thresh: f64) -> Self {
        Self { score_thresh }
    }

    /// `true` if `doc`'s raw pages plausibly pertain to `location`.
    pub async fn check(&self, caller: &StructuredLlmCaller, doc: &Document, location: &Location) -> anyhow::Result<bool> {
        let county = &location.name;
        let state = &location.state;

        let jurisdiction_is_county = validator_check_across_pages(
            &CountyJurisdictionValidator,
            caller,
            doc.raw_pages(),
            county,
            state,
            self.score_thresh,
        )
        .await?;
        if !jurisdiction_is_county {
            return Ok(false);
        }

        if let Some(source) = doc.attrs.source.as_deref() {
            let url_is_county = UrlValidator.check(caller, source, county, state).await?;
            if url_is_county {
                return Ok(true);
            }
        }

        if heuristic_check_for_county_and_state(doc, county, state) {
            return Ok(true);
        }

        validator_check_across_pages(
            &CountyNameValidator,
            caller,
            doc.raw_pages(),
            county,
            state,
            self.score_thresh,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_vote_favors_longer_pages() {
        let pages = vec!["short".to_string(), "a much longer page of text here".to_string()];
        let score = weighted_vote(&[false, true], &pages);
        assert!(score > 0.5);
    }

    #[test]
    fn weighted_vote_empty_pages_is_zero() {
        assert_eq!(weighted_vote(&[], &[]), 0.0);
    }

    #[test]
    fn heuristic_requires_both_county_and_state_mentions() {
        let doc = Document::new(
            crate::document::DocumentKind::Html,
            vec!["This applies to Park County only.".to_string()],
        );
        assert!(!heuristic_check_for_county_and_state(&doc, "Park", "Colorado"));

        let doc2 = Document::new(
            crate::document::DocumentKind::Html,
            vec!["This applies to Park County, Colorado.".to_string()],
        );
        assert!(heuristic_check_for_county_and_state(&doc2, "Park", "Colorado"));
    }
}
