//! Per-chunk boolean validation with lookback memory.
//!
//! Grounded on `elm/ords/validation/content.py::ValidationWithMemory` and
//! `possibly_mentions_wind`. The keyword heuristic is generalized from a
//! hardcoded wind-energy vocabulary into a caller-supplied [`KeywordHeuristic`]
//! (SPEC_FULL.md supplemented feature #2) so the same validator memoizes
//! and recalls chunks for any subject-matter keyword set, not just wind.

use std::collections::HashMap;

use crate::llm::StructuredLlmCaller;

/// A configurable replacement for the original's hardcoded
/// `NOT_WIND_WORDS`/`GOOD_WIND_KEYWORDS`/`GOOD_WIND_ACRONYMS`/
/// `GOOD_WIND_PHRASES` heuristic. Counts keyword, acronym, and phrase
/// matches the same way `possibly_mentions_wind` does, against a
/// case-folded copy of the text with lookalike words stripped out first.
pub struct KeywordHeuristic {
    lookalike_words: Vec<String>,
    keywords: Vec<String>,
    acronyms: Vec<String>,
    acronym_contexts: Vec<String>,
    phrases: Vec<String>,
    match_count_threshold: usize,
}

impl KeywordHeuristic {
    pub fn new(keywords: Vec<String>) -> Self {
        Self {
            lookalike_words: Vec::new(),
            keywords,
            acronyms: Vec::new(),
            acronym_contexts: vec![
                " {acronym} ".to_string(),
                " {acronym}\n".to_string(),
                " {acronym}.".to_string(),
                "\n{acronym} ".to_string(),
                "\n{acronym}.".to_string(),
                "\n{acronym}\n".to_string(),
                "({acronym} ".to_string(),
                " {acronym})".to_string(),
            ],
            phrases: Vec::new(),
            match_count_threshold: 1,
        }
    }

    pub fn with_lookalike_words(mut self, words: Vec<String>) -> Self {
        self.lookalike_words = words;
        self
    }

    pub fn with_acronyms(mut self, acronyms: Vec<String>) -> Self {
        self.acronyms = acronyms;
        self
    }

    pub fn with_phrases(mut self, phrases: Vec<String>) -> Self {
        self.phrases = phrases;
        self
    }

    pub fn with_match_count_threshold(mut self, threshold: usize) -> Self {
        self.match_count_threshold = threshold;
        self
    }

    /// Preconfigured for wind-energy ordinance text, matching the
    /// original's `NOT_WIND_WORDS`/`GOOD_WIND_KEYWORDS`/etc. exactly.
    pub fn wind_energy() -> Self {
        Self::new(vec!["wind".to_string(), "setback".to_string()])
            .with_lookalike_words(
                [
                    "windy", "winds", "window", "windiest", "windbreak", "windshield",
                    "wind blow", "wind erosion", "rewind", "mini wecs", "swecs",
                    "private wecs", "pwecs", "wind direction", "wind movement",
                    "wind attribute", "wind runway", "wind load", "wind orient",
                    "wind damage",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            )
            .with_acronyms(
                ["wecs", "wes", "lwet", "uwet", "wef"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            )
            .with_phrases(
                ["wind energy conversion", "wind turbine", "wind tower"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            )
    }

    fn heuristics_text(&self, text: &str) -> String {
        let mut folded = text.to_lowercase();
        for word in &self.lookalike_words {
            folded = folded.replace(word.as_str(), "");
        }
        folded
    }

    fn count_keyword_matches(&self, text: &str) -> usize {
        self.keywords.iter().filter(|kw| text.contains(kw.as_str())).count()
    }

    fn count_acronym_matches(&self, text: &str) -> usize {
        for context in &self.acronym_contexts {
            let matches = self
                .acronyms
                .iter()
                .filter(|acronym| text.contains(&context.replace("{acronym}", acronym)))
                .count();
            if matches > 0 {
                return matches;
            }
        }
        0
    }

    fn count_phrase_matches(&self, text: &str) -> usize {
        self.phrases
            .iter()
            .filter(|phrase| phrase.split(' ').all(|word| text.contains(word)))
            .count()
    }

    /// `true` if the number of matched keywords/acronyms/phrases strictly
    /// exceeds `match_count_threshold`.
    pub fn possibly_mentions(&self, text: &str) -> bool {
        let heuristics_text = self.heuristics_text(text);
        let total = self.count_keyword_matches(&heuristics_text)
            + self.count_acronym_matches(&heuristics_text)
            + self.count_phrase_matches(&heuristics_text);
        total > self.match_count_threshold
    }
}

/// Validates text chunks one at a time, recalling up to `num_to_recall`
/// previous chunks (inclusive of the current one) when the LLM's answer
/// for a given key is `false`, and memoizing every key it has already
/// asked about per chunk so it never re-queries the same (chunk, key)
/// pair. Grounded on `ValidationWithMemory.parse_from_ind`.
pub struct ContentMemoryValidator<'a> {
    caller: &'a StructuredLlmCaller,
    text_chunks: &'a [String],
    num_to_recall: usize,
    memory: Vec<HashMap<String, bool>>,
}

impl<'a> ContentMemoryValidator<'a> {
    pub fn new(caller: &'a StructuredLlmCaller, text_chunks: &'a [String], num_to_recall: usize) -> Self {
        let memory = text_chunks.iter().map(|_| HashMap::new()).collect();
        Self {
            caller,
            text_chunks,
            num_to_recall,
            memory,
        }
    }

    /// `prompt` must contain a `{key}` placeholder and request a JSON
    /// boolean output for `key`. Checks `text_chunks[ind]` first, then up
    /// to `num_to_recall - 1` chunks before it, short-circuiting as soon
    /// as one returns `true`.
    pub async fn parse_from_ind(&mut self, ind: usize, prompt: &str, key: &str) -> anyhow::Result<bool> {
        let lo = ind + 1 - self.num_to_recall.min(ind + 1);
        for i in (lo..=ind).rev() {
            if let Some(&cached) = self.memory[i].get(key) {
                if cached {
                    return Ok(true);
                }
                continue;
            }
            let sys_msg = prompt.replace("{key}", key);
            let response = self.caller.call(&sys_msg, &self.text_chunks[i]).await?;
            let check = response.get(key).and_then(|v| v.as_bool()).unwrap_or(false);
            self.memory[i].insert(key.to_string(), check);
            if check {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
