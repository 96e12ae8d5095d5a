//! Structured setback-value extraction fanned out over a `PromptGraph`
//! collaborator.
//!
//! Grounded on `elm/ords/extraction/parse.py::StructuredOrdinanceParser`,
//! `elm/ords/extraction/features.py::SetbackFeatures`, and
//! `elm/ords/process.py::_empirical_adjustments`. The original hardcodes
//! its prompt wording in `elm/ords/extraction/graphs.py`; domain prompt
//! libraries are out of scope here, so every tree-construction step goes
//! through the `PromptGraphFactory` trait instead. The orchestration logic
//! (base absence check, participating/non-participating branching,
//! multiplier/conditional sub-trees, extra restrictions, empirical
//! post-processing) is reusable for any regulatory domain the caller's
//! factory targets.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::graph::{DecisionGraph, DecisionTree};
use crate::llm::ChatMessage;
use crate::service::ServiceProvider;
use crate::usage::UsageTracker;

const DEFAULT_SYSTEM_MESSAGE: &str =
    "You are a legal scholar explaining legal ordinances to a wind energy developer.";
const DEFAULT_BAD_ADDER_THRESHOLD_FT: f64 = 250.0;

/// One setback feature to extract (property line, structure, road, ...),
/// ported verbatim from `SetbackFeatures.DEFAULT_FEATURE_DESCRIPTIONS`/
/// `FEATURES_AS_IGNORE`/`FEATURE_CLARIFICATIONS`.
#[derive(Debug, Clone)]
pub struct FeatureSpec {
    pub feature_id: String,
    pub feature: String,
    pub ignore_features: String,
    pub feature_clarifications: String,
    /// `true` for features (structures, property lines) that the original
    /// splits into participating-owner / non-participating-owner rows.
    pub has_participating_variant: bool,
}

fn join_keywords(keywords: &[&str], final_sep: &str) -> String {
    match keywords {
        [] => String::new(),
        [only] => only.to_string(),
        _ => {
            let (last, rest) = keywords.split_last().unwrap();
            format!("{}{}{}", rest.join(", "), final_sep, last)
        }
    }
}

/// The default setback feature list, in the same order as the original's
/// `DEFAULT_FEATURE_DESCRIPTIONS` dict (struct, pline, roads, rail, trans,
/// water).
pub fn setback_features() -> Vec<FeatureSpec> {
    let defs: &[(&str, &[&str], &str, &str, bool)] = &[
        (
            "struct",
            &["occupied dwellings", "buildings", "structures", "residences"],
            "structures",
            "",
            true,
        ),
        ("pline", &["property lines", "parcels", "subdivisions"], "property lines", "", true),
        ("roads", &["roads"], "roads", "Roads may also be labeled as rights-of-way. ", false),
        ("rail", &["railroads"], "railroads", "", false),
        (
            "trans",
            &[
                "overhead electrical transmission lines",
                "overhead utility lines",
                "utility easements",
                "utility lines",
                "power lines",
                "electrical lines",
                "transmission lines",
            ],
            "transmission lines",
            "",
            false,
        ),
        ("water", &["lakes", "reservoirs", "streams", "rivers", "wetlands"], "wetlands", "", false),
    ];

    defs.iter()
        .map(|(feature_id, keep_keywords, _, clarification, participating)| {
            // Preserves `DEFAULT_FEATURE_DESCRIPTIONS`/`FEATURES_AS_IGNORE`'s
            // dict insertion order (struct, pline, roads, rail, trans,
            // water), skipping only the feature being described.
            let ignore: Vec<&str> = defs
                .iter()
                .filter(|(id, ..)| id != feature_id)
                .map(|(_, _, ignore_phrase, ..)| *ignore_phrase)
                .collect();
            FeatureSpec {
                feature_id: feature_id.to_string(),
                feature: join_keywords(keep_keywords, ", and/or "),
                ignore_features: join_keywords(&ignore, ", and "),
                feature_clarifications: clarification.to_string(),
                has_participating_variant: *participating,
            }
        })
        .collect()
}

/// A non-setback restriction to check for (noise, height, lot size, ...),
/// ported from `EXTRA_RESTRICTIONS_TO_CHECK`.
#[derive(Debug, Clone)]
pub struct ExtraRestriction {
    pub key: String,
    pub description: String,
}

pub fn extra_restrictions() -> Vec<ExtraRestriction> {
    [
        ("noise", "maximum noise level"),
        ("max height", "maximum turbine height"),
        ("min lot size", "minimum lot size"),
        ("shadow flicker", "maximum shadow flicker"),
        ("density", "maximum turbine spacing"),
    ]
    .into_iter()
    .map(|(key, description)| ExtraRestriction {
        key: key.to_string(),
        description: description.to_string(),
    })
    .collect()
}

/// Builds the feature-specific decision graphs the structured parser
/// drives. External collaborator: the crate ships no concrete
/// implementation, since prompt wording is domain-specific (wind setbacks
/// vs. water-rights rules use entirely different legal language) and
/// explicitly out of core scope.
pub trait PromptGraphFactory: Send + Sync {
    /// Graph that determines the largest wind-energy-system size
    /// mentioned in `text` (or any domain-equivalent classification).
    fn wes_types_graph(&self, text: &str) -> DecisionGraph;

    /// Graph that checks whether `text` contains any setback requirement
    /// for `feature` at all, and if so extracts the raw supporting text.
    fn base_graph(&self, feature: &FeatureSpec, wes_type: &str, text: &str) -> DecisionGraph;

    /// Graph that splits setback text into participating-owner and
    /// non-participating-owner excerpts.
    fn participating_owner_graph(&self, feature: &FeatureSpec, wes_type: &str, text: &str) -> DecisionGraph;

    /// Graph that extracts the setback multiplier (value, dimension,
    /// static adder) for `feature`.
    fn multiplier_graph(&self, feature: &str, wes_type: &str, text: &str) -> DecisionGraph;

    /// Graph that extracts min/max static setback bounds for `feature`,
    /// run only when a multiplier was found.
    fn conditional_graph(&self, feature: &str, wes_type: &str, text: &str) -> DecisionGraph;

    /// Graph that checks for a non-setback restriction (noise, height,
    /// ...) described by `restriction`.
    fn extra_restriction_graph(&self, restriction: &ExtraRestriction, wes_type: &str, text: &str) -> DecisionGraph;
}

/// Whether a feature was found at all, decided from the base graph's
/// transcript. Mirrors `elm/ords/extraction/parse.py::_found_ord`, which
/// reads `messages[2]` (the assistant's reply to the `init` node) and
/// checks it starts with "yes" — this only works because `base_graph`'s
/// `init` node is always the first LLM call, regardless of how far the
/// tree continues past it.
fn found_ord(base_messages: &[ChatMessage]) -> bool {
    base_messages
        .get(2)
        .map(|m| crate::graph::starts_with_yes(&m.content))
        .unwrap_or(false)
}

/// The empty-row output for a feature that wasn't found in the text.
/// Features with a participating/non-participating split still emit both
/// variant rows (empty), matching `_empty_output`.
fn empty_output(feature: &FeatureSpec) -> Vec<Map<String, Value>> {
    if feature.has_participating_variant {
        vec![
            row(&format!("{} (participating)", feature.feature_id)),
            row(&format!("{} (non-participating)", feature.feature_id)),
        ]
    } else {
        vec![row(&feature.feature_id)]
    }
}

fn row(feature_name: &str) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert("feature".to_string(), Value::String(feature_name.to_string()));
    m
}

/// Fans a block of cleaned ordinance text out across every configured
/// setback feature and extra restriction, one decision-tree run each, and
/// assembles the results into a flat row table.
pub struct StructuredParser {
    provider: Arc<ServiceProvider>,
    service_name: &'static str,
    model: String,
    usage_tracker: Option<Arc<Mutex<UsageTracker>>>,
    factory: Arc<dyn PromptGraphFactory>,
    bad_adder_threshold_ft: f64,
}

impl StructuredParser {
    pub fn new(
        provider: Arc<ServiceProvider>,
        service_name: &'static str,
        model: impl Into<String>,
        usage_tracker: Option<Arc<Mutex<UsageTracker>>>,
        factory: Arc<dyn PromptGraphFactory>,
    ) -> Self {
        Self {
            provider,
            service_name,
            model: model.into(),
            usage_tracker,
            factory,
            bad_adder_threshold_ft: DEFAULT_BAD_ADDER_THRESHOLD_FT,
        }
    }

    /// Overrides the empirical "reject adder values above N feet"
    /// post-processing threshold (Design Note #3 — kept configurable
    /// rather than hardcoded).
    pub fn with_bad_adder_threshold_ft(mut self, threshold: f64) -> Self {
        self.bad_adder_threshold_ft = threshold;
        self
    }

    fn new_tree(&self, graph: DecisionGraph, system_message: impl Into<String>) -> DecisionTree {
        let caller = crate::llm::ChatLlmCaller::new(
            self.provider.clone(),
            self.service_name,
            self.model.clone(),
            system_message,
            self.usage_tracker.clone(),
        );
        DecisionTree::new(graph, caller)
    }

    /// Extracts every configured feature and restriction from `text` and
    /// returns the flattened row table (the crate's substitute for the
    /// original's `pd.DataFrame`).
    pub async fn parse(&self, text: &str) -> anyhow::Result<Vec<Map<String, Value>>> {
        let wes_type = self.check_wind_turbine_type(text).await;

        let feature_rows = futures::future::join_all(
            setback_features()
                .into_iter()
                .map(|feature| self.parse_setback_feature(text, feature, &wes_type)),
        )
        .await;

        let extra_rows = futures::future::join_all(
            extra_restrictions()
                .into_iter()
                .map(|restriction| self.parse_extra_restriction(text, restriction, &wes_type)),
        )
        .await;

        let mut rows = Vec::new();
        for result in feature_rows.into_iter().chain(extra_rows) {
            rows.extend(result?);
        }

        apply_empirical_adjustments(&mut rows, self.bad_adder_threshold_ft);
        Ok(rows)
    }

    async fn check_wind_turbine_type(&self, text: &str) -> String {
        let graph = self.factory.wes_types_graph(text);
        let mut tree = self.new_tree(graph, DEFAULT_SYSTEM_MESSAGE);
        let out = tree.run_or_empty("init").await;
        out.get("largest_wes_type")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("large wind energy systems")
            .to_string()
    }

    async fn parse_extra_restriction(
        &self,
        text: &str,
        restriction: ExtraRestriction,
        wes_type: &str,
    ) -> anyhow::Result<Vec<Map<String, Value>>> {
        let system_message = format!(
            "{DEFAULT_SYSTEM_MESSAGE} For the duration of this conversation, only \
             focus on ordinances relating to {} for {wes_type}. Ignore all text that \
             pertains to private, micro, small, or medium sized wind energy systems.",
            restriction.description
        );
        let graph = self.factory.extra_restriction_graph(&restriction, wes_type, text);
        let mut tree = self.new_tree(graph, system_message);
        let mut info = tree.run_or_empty("init").await;
        let obj = info.as_object_mut().expect("run_or_empty always returns an object");
        obj.insert("feature".to_string(), Value::String(restriction.key));
        Ok(vec![obj.clone()])
    }

    async fn parse_setback_feature(
        &self,
        text: &str,
        feature: FeatureSpec,
        wes_type: &str,
    ) -> anyhow::Result<Vec<Map<String, Value>>> {
        let base_messages = self.base_messages(text, &feature, wes_type).await;
        if !found_ord(&base_messages) {
            return Ok(empty_output(&feature));
        }

        if !feature.has_participating_variant {
            let mut output = row(&feature.feature_id);
            let values = self.extract_setback_values(text, &feature.feature, wes_type, None).await?;
            output.extend(values);
            return Ok(vec![output]);
        }

        self.extract_setback_values_for_variants(text, &feature, wes_type, base_messages).await
    }

    fn setback_system_message(&self, feature: &str, wes_type: &str) -> String {
        format!(
            "{DEFAULT_SYSTEM_MESSAGE} For the duration of this conversation, only focus \
             on ordinances relating to setbacks from {feature} for {wes_type}. Ignore all \
             text that pertains to private, micro, small, or medium sized wind energy systems."
        )
    }

    /// Runs the base absence-check tree and returns its full transcript,
    /// including the non-JSON "get_text" follow-up reply if the tree
    /// continued past `init`.
    async fn base_messages(&self, text: &str, feature: &FeatureSpec, wes_type: &str) -> Vec<ChatMessage> {
        let system_message = self.setback_system_message(&feature.feature, wes_type);
        let graph = self.factory.base_graph(feature, wes_type, text);
        let mut tree = self.new_tree(graph, system_message);
        let _ = tree.run_ignoring_errors("init").await;
        tree.caller().messages().to_vec()
    }

    async fn extract_setback_values_for_variants(
        &self,
        text: &str,
        feature: &FeatureSpec,
        wes_type: &str,
        base_messages: Vec<ChatMessage>,
    ) -> anyhow::Result<Vec<Map<String, Value>>> {
        let system_message = self.setback_system_message(&feature.feature, wes_type);
        let graph = self.factory.participating_owner_graph(feature, wes_type, text);
        let mut tree = self.new_tree(graph, system_message);
        tree.caller_mut().restore(base_messages.clone());
        let split = tree.run_or_empty("init").await;
        let split = split.as_object().cloned().unwrap_or_default();

        let variants = futures::future::join_all(split.into_iter().map(|(key, sub_text)| {
            let sub_text = sub_text.as_str().unwrap_or_default().to_string();
            self.parse_variant_text(key, sub_text, feature, wes_type, base_messages.clone())
        }))
        .await;

        Ok(variants)
    }

    async fn parse_variant_text(
        &self,
        key: String,
        sub_text: String,
        feature: &FeatureSpec,
        wes_type: &str,
        base_messages: Vec<ChatMessage>,
    ) -> Map<String, Value> {
        let out_feature_name = format!("{} ({key})", feature.feature_id);
        let mut output = row(&out_feature_name);
        if sub_text.is_empty() {
            return output;
        }

        let prefixed_feature = format!("{key} {}", feature.feature);
        let mut base_messages = base_messages;
        let len = base_messages.len();
        if len >= 2 {
            base_messages[len - 2].content = format!(
                "Can you extract the raw text with original formatting that states how close \
                 I can site {wes_type} to {prefixed_feature}? "
            );
            base_messages[len - 1].content = sub_text.clone();
        }

        match self
            .extract_setback_values(&sub_text, &prefixed_feature, wes_type, Some(base_messages))
            .await
        {
            Ok(values) => {
                output.extend(values);
                output
            }
            Err(_) => output,
        }
    }

    async fn extract_setback_values(
        &self,
        text: &str,
        feature: &str,
        wes_type: &str,
        base_messages: Option<Vec<ChatMessage>>,
    ) -> anyhow::Result<Map<String, Value>> {
        let mut out = self.run_setback_graph(|f| f.multiplier_graph(feature, wes_type, text), feature, wes_type, base_messages).await;

        if out.get("mult_value").map(Value::is_null).unwrap_or(true) {
            return Ok(out);
        }

        let conditional = self
            .run_setback_graph(|f| f.conditional_graph(feature, wes_type, text), feature, wes_type, None)
            .await;
        if let Some(obj) = conditional.as_object() {
            out.extend(obj.clone());
        }
        Ok(out)
    }

    async fn run_setback_graph(
        &self,
        build_graph: impl FnOnce(&dyn PromptGraphFactory) -> DecisionGraph,
        feature: &str,
        wes_type: &str,
        base_messages: Option<Vec<ChatMessage>>,
    ) -> Map<String, Value> {
        let system_message = self.setback_system_message(feature, wes_type);
        let graph = build_graph(self.factory.as_ref());
        let mut tree = self.new_tree(graph, system_message);
        if let Some(messages) = base_messages {
            tree.caller_mut().restore(messages);
        }
        let value = tree.run_or_empty("init").await;
        value.as_object().cloned().unwrap_or_default()
    }
}

/// Post-processing adjustments based on empirical observations. Currently
/// just clamps implausibly large "adder" values to absent, matching
/// `elm/ords/process.py::_empirical_adjustments`'s 250ft default
/// threshold (Design Note #3 — configurable via
/// [`StructuredParser::with_bad_adder_threshold_ft`]).
fn apply_empirical_adjustments(rows: &mut [Map<String, Value>], bad_adder_threshold_ft: f64) {
    for row in rows.iter_mut() {
        let exceeds = row.get("adder").and_then(Value::as_f64).map(|v| v > bad_adder_threshold_ft).unwrap_or(false);
        if exceeds {
            row.insert("adder".to_string(), Value::Null);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_feature_joins_four_keywords_with_and_or() {
        let features = setback_features();
        let f = features.iter().find(|f| f.feature_id == "struct").unwrap();
        assert_eq!(f.feature, "occupied dwellings, buildings, structures, and/or residences");
        assert!(f.has_participating_variant);
    }

    #[test]
    fn roads_feature_is_not_participating_and_has_clarification() {
        let features = setback_features();
        let f = features.iter().find(|f| f.feature_id == "roads").unwrap();
        assert!(!f.has_participating_variant);
        assert!(f.feature_clarifications.contains("rights-of-way"));
    }

    #[test]
    fn empty_output_splits_participating_features_into_two_rows() {
        let features = setback_features();
        let f = features.iter().find(|f| f.feature_id == "struct").unwrap();
        let rows = empty_output(f);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["feature"], "struct (participating)");
        assert_eq!(rows[1]["feature"], "struct (non-participating)");
    }

    #[test]
    fn empty_output_single_row_for_non_participating_features() {
        let features = setback_features();
        let f = features.iter().find(|f| f.feature_id == "roads").unwrap();
        let rows = empty_output(f);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["feature"], "roads");
    }

    #[test]
    fn found_ord_reads_third_message_as_init_reply() {
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("init prompt"),
            ChatMessage::assistant("Yes, there is setback text."),
        ];
        assert!(found_ord(&messages));

        let messages_no = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("init prompt"),
            ChatMessage::assistant("No mention found."),
        ];
        assert!(!found_ord(&messages_no));
    }

    #[test]
    fn empirical_adjustment_nulls_out_large_adders() {
        let mut rows = vec![{
            let mut m = Map::new();
            m.insert("adder".to_string(), Value::from(400.0));
            m
        }];
        apply_empirical_adjustments(&mut rows, 250.0);
        assert!(rows[0]["adder"].is_null());
    }

    #[test]
    fn empirical_adjustment_keeps_plausible_adders() {
        let mut rows = vec![{
            let mut m = Map::new();
            m.insert("adder".to_string(), Value::from(50.0));
            m
        }];
        apply_empirical_adjustments(&mut rows, 250.0);
        assert_eq!(rows[0]["adder"], 50.0);
    }
}
