//! Cleaning and parsing of LLM replies that are expected to contain JSON.
//!
//! Ported from `elm/ords/utilities/parsing.py::llm_response_as_json`,
//! including its exact (slightly odd) character-class stripping: `lstrip`
//! and `rstrip` in Python strip any character in the given set from the
//! respective end, not the literal substring — so `lstrip("json")` drops
//! any leading run of the characters `j`, `s`, `o`, `n`, not just that exact
//! word. Reproduced here rather than "fixed" so replies the original tooling
//! already handles keep parsing the same way.

use serde_json::Value;

const JSON_INSTRUCTIONS: &str = "Return your answer in JSON format";

/// Best-effort parse of an LLM reply into a JSON value. Returns an empty
/// object rather than an error if the cleaned content doesn't parse,
/// matching the original's "never fail the caller, just return `{}`"
/// contract.
pub fn llm_response_as_json(content: &str) -> Value {
    let content = content.trim();
    let content = content.trim_start_matches('`');
    let content = content.trim_start_matches(|c| "json".contains(c));
    let content = content.trim_start_matches('\n');
    let content = content.trim_end_matches('`');
    let content = content.replace("True", "true").replace("False", "false");

    serde_json::from_str(&content).unwrap_or_else(|e| {
        tracing::error!(
            error = %e,
            "LLM returned improperly formatted JSON; treating as empty. Raw reply:\n{content}"
        );
        Value::Object(serde_json::Map::new())
    })
}

/// Append the JSON-format instruction to a system message if it isn't
/// already present (case-insensitively).
pub fn add_json_instructions_if_needed(system_message: &str) -> String {
    if system_message.to_lowercase().contains(&JSON_INSTRUCTIONS.to_lowercase()) {
        system_message.to_string()
    } else {
        format!("{system_message} {JSON_INSTRUCTIONS}.")
    }
}
