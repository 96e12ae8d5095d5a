//! Ordinance enactment date extraction (supplemented feature).
//!
//! Grounded on `elm/ords/extraction/date.py::DateExtractor`: queries each
//! raw page independently for a year/month/day guess, then takes the max
//! of each component across pages, discarding values the original
//! considers implausible (too many digits, out of range).

use crate::document::PartialDate;
use crate::llm::StructuredLlmCaller;

const SYSTEM_MESSAGE: &str = "You are a legal scholar that reads ordinance \
text and extracts structured date information. Your JSON file must \
include exactly four keys. The first key is 'explanation', which contains \
a short summary of the most relevant date information you found in the \
text. The second key is 'year', which should contain an integer value \
that represents the latest year this ordinance was enacted/updated, or \
null if that information cannot be found in the text. The third key is \
'month', which should contain an integer value that represents the \
latest month of the year this ordinance was enacted/updated, or null if \
that information cannot be found in the text. The fourth key is 'day', \
which should contain an integer value that represents the latest day of \
the month this ordinance was enacted/updated, or null if that information \
cannot be found in the text.";

pub struct DateExtractor<'a> {
    caller: &'a StructuredLlmCaller,
}

impl<'a> DateExtractor<'a> {
    pub fn new(caller: &'a StructuredLlmCaller) -> Self {
        Self { caller }
    }

    /// Queries each of `raw_pages` for date information and combines the
    /// results into a single best-guess `(year, month, day)`.
    pub async fn parse(&self, raw_pages: &[String]) -> anyhow::Result<PartialDate> {
        let mut all_replies = Vec::new();
        for text in raw_pages {
            if text.is_empty() {
                continue;
            }
            let content = format!("Please extract the date for this ordinance:\n{text}");
            let response = self.caller.call_labeled(SYSTEM_MESSAGE, &content, Some("date_extraction")).await?;
            if response.as_object().is_some_and(|m| !m.is_empty()) {
                all_replies.push(response);
            }
        }
        Ok(parse_date(&all_replies))
    }
}

fn parse_date(replies: &[serde_json::Value]) -> PartialDate {
    let year = parse_date_element(replies, "year", 4, 2000, i64::MAX);
    let month = parse_date_element(replies, "month", 2, 1, 12);
    let day = parse_date_element(replies, "day", 2, 1, 31);
    (
        year.map(|v| v as i32),
        month.map(|v| v as u32),
        day.map(|v| v as u32),
    )
}

fn parse_date_element(replies: &[serde_json::Value], key: &str, max_len: usize, min_val: i64, max_val: i64) -> Option<i64> {
    replies
        .iter()
        .filter_map(|reply| reply.get(key).and_then(element_as_i64))
        .filter(|&v| v.to_string().trim_start_matches('-').len() <= max_len)
        .filter(|&v| v >= min_val && v <= max_val)
        .max()
}

fn element_as_i64(value: &serde_json::Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    value.as_f64().map(|f| f as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn takes_max_plausible_year_across_pages() {
        let replies = vec![json!({"year": 2019}), json!({"year": 2021}), json!({"year": 1500})];
        assert_eq!(parse_date_element(&replies, "year", 4, 2000, i64::MAX), Some(2021));
    }

    #[test]
    fn rejects_values_with_too_many_digits() {
        let replies = vec![json!({"month": 123})];
        assert_eq!(parse_date_element(&replies, "month", 2, 1, 12), None);
    }

    #[test]
    fn no_plausible_values_yields_none() {
        let replies: Vec<serde_json::Value> = vec![json!({"day": null})];
        assert_eq!(parse_date_element(&replies, "day", 2, 1, 31), None);
    }

    #[test]
    fn combines_all_three_components() {
        let replies = vec![json!({"year": 2020, "month": 5, "day": 14})];
        assert_eq!(parse_date(&replies), (Some(2020), Some(5), Some(14)));
    }
}
