//! Wind-energy ordinance content extractor.
//!
//! Grounded on `elm/ords/extraction/ordinance.py::OrdinanceExtractor`,
//! which inherits `ValidationWithMemory`'s chunk/memory machinery (ported
//! here as [`crate::validate::ContentMemoryValidator`]) and adds three
//! fixed prompts plus a legal-text majority gate, a keyword heuristic gate
//! (`possibly_mentions_wind`, generalized to [`KeywordHeuristic`]), and a
//! utility-scale gate.

use crate::llm::StructuredLlmCaller;
use crate::validate::{ContentMemoryValidator, KeywordHeuristic};

const IS_LEGAL_TEXT_PROMPT: &str = "You extract structured data from text. \
Your JSON file must include exactly three keys. The first key is \
'summary', which is a string that provides a short summary of the text. \
The second key is 'type', which is a string that best represents the type \
of document this text belongs to. The third key is '{key}', which is a \
boolean that is set to true if the type of the text (as you previously \
determined) is a legally-binding statute or code and false if the text is \
an excerpt from other non-legal text such as a news article, survey, \
summary, application, public notice, etc.";

const CONTAINS_ORD_PROMPT: &str = "You extract structured data from text. \
Your JSON file must include exactly three keys. The first key is \
'wind_reqs', which is a string that summarizes the setbacks or other \
geospatial siting requirements (if any) given in the text for a wind \
turbine. The second key is 'reqs', which lists the quantitative values \
from the text excerpt that can be used to compute setbacks or other \
geospatial siting requirements for a wind turbine/tower (empty list if \
none exist in the text). The last key is '{key}', which is a boolean that \
is set to true if the text excerpt provides enough quantitative info to \
compute setbacks or other geospatial siting requirements for a wind \
turbine/tower and false otherwise. Geospatial siting is impacted by any \
of the following:\n\
- buildings / structures / residences\n\
- property lines / parcels / subdivisions\n\
- roads / rights-of-way\n\
- railroads\n\
- overhead electrical transmission wires\n\
- bodies of water including wetlands, lakes, reservoirs, streams, and rivers\n\
- natural, wildlife, and environmental conservation areas\n\
- noise restrictions\n\
- shadow flicker restrictions\n\
- density restrictions\n\
- turbine height restrictions\n\
- minimum/maximum lot size";

const IS_UTILITY_SCALE_PROMPT: &str = "You are a legal scholar that reads \
ordinance text and determines whether it applies to large wind energy \
systems. Wind energy systems (WES) may also be referred to as wind \
turbines, wind energy conversion systems (WECS), wind energy facilities \
(WEF), wind energy turbines (WET), large wind energy turbines (LWET), \
utility-scale wind energy turbines (UWET), commercial wind energy systems, \
or similar. Your client is a wind developer that does not care about \
ordinances related to private, micro, small, or medium sized wind energy \
systems. Your JSON file must include exactly two keys. The first key is \
'summary' which contains a string that summarizes the types of wind \
energy systems the text applies to (if any). The second key is '{key}', \
which is a boolean that is set to true if any part of the text excerpt is \
applicable to the type of wind energy conversion systems that the client \
is interested in and false otherwise.";

struct OrdinanceChunk {
    text: String,
    ind: usize,
}

/// Scans chunked ordinance-candidate text for passages describing wind
/// turbine setback requirements, gating LLM calls behind a cheap keyword
/// heuristic and a running legal-text majority vote.
pub struct OrdinanceExtractor<'a> {
    memory: ContentMemoryValidator<'a>,
    text_chunks: &'a [String],
    num_to_recall: usize,
    heuristic: KeywordHeuristic,
    legal_text_votes: Vec<bool>,
    wind_mention_votes: Vec<bool>,
    ordinance_chunks: Vec<OrdinanceChunk>,
}

impl<'a> OrdinanceExtractor<'a> {
    pub fn new(caller: &'a StructuredLlmCaller, text_chunks: &'a [String], num_to_recall: usize) -> Self {
        Self {
            memory: ContentMemoryValidator::new(caller, text_chunks, num_to_recall),
            text_chunks,
            num_to_recall,
            heuristic: KeywordHeuristic::wind_energy(),
            legal_text_votes: Vec::new(),
            wind_mention_votes: Vec::new(),
            ordinance_chunks: Vec::new(),
        }
    }

    pub fn with_heuristic(mut self, heuristic: KeywordHeuristic) -> Self {
        self.heuristic = heuristic;
        self
    }

    fn is_legal_text(&self) -> bool {
        if self.legal_text_votes.is_empty() {
            return false;
        }
        let yes = self.legal_text_votes.iter().filter(|&&v| v).count();
        yes as f64 >= 0.5 * self.legal_text_votes.len() as f64
    }

    /// Reconstructs the combined ordinance passage from every chunk
    /// identified as ordinance-bearing, including `num_to_recall`
    /// neighbors on each side, deduplicated against overlap.
    pub fn ordinance_text(&self) -> String {
        let mut indices = std::collections::BTreeSet::new();
        for chunk in &self.ordinance_chunks {
            let lo = chunk.ind as i64 - (self.num_to_recall as i64 - 1);
            for offset in lo..=(chunk.ind as i64 + 1) {
                if offset >= 0 {
                    indices.insert(offset as usize);
                }
            }
        }
        let texts: Vec<String> = indices
            .into_iter()
            .filter(|&i| i < self.text_chunks.len())
            .map(|i| self.text_chunks[i].clone())
            .collect();
        merge_overlapping_texts(&texts, 300)
    }

    /// Scans all chunks, returning `true` if any ordinance-bearing text
    /// was found. `min_chunks_to_process` gates the legal-text majority
    /// check and the keyword-heuristic skip: the first chunks are always
    /// fully processed so there's a baseline vote to check against.
    pub async fn parse(&mut self, min_chunks_to_process: usize) -> anyhow::Result<bool> {
        for ind in 0..self.text_chunks.len() {
            self.wind_mention_votes
                .push(self.heuristic.possibly_mentions(&self.text_chunks[ind]));

            if ind >= min_chunks_to_process {
                if !self.is_legal_text() {
                    return Ok(false);
                }
                let recall_start = self.wind_mention_votes.len().saturating_sub(self.num_to_recall);
                if !self.wind_mention_votes[recall_start..].iter().any(|&v| v) {
                    continue;
                }
            }

            if ind < min_chunks_to_process {
                let is_legal_text = self
                    .memory
                    .parse_from_ind(ind, IS_LEGAL_TEXT_PROMPT, "legal_text")
                    .await?;
                self.legal_text_votes.push(is_legal_text);
                if !is_legal_text {
                    continue;
                }
            }

            let contains_ord_info = self
                .memory
                .parse_from_ind(ind, CONTAINS_ORD_PROMPT, "contains_ord_info")
                .await?;
            if !contains_ord_info {
                continue;
            }

            let is_utility_scale = self.memory.parse_from_ind(ind, IS_UTILITY_SCALE_PROMPT, "x").await?;
            if !is_utility_scale {
                continue;
            }

            self.ordinance_chunks.push(OrdinanceChunk {
                text: self.text_chunks[ind].clone(),
                ind,
            });
            if let Some(last) = self.wind_mention_votes.last_mut() {
                *last = false;
            }
        }

        Ok(!self.ordinance_chunks.is_empty())
    }
}

/// Joins `text_chunks` into one string, removing overlap between
/// consecutive chunks by searching for `next_text`'s first `n` characters
/// within `out_text`'s last `2n` characters. Grounded on
/// `elm/ords/utilities/parsing.py::merge_overlapping_texts`.
pub fn merge_overlapping_texts(text_chunks: &[String], n: usize) -> String {
    let mut chunks = text_chunks.iter();
    let Some(first) = chunks.next() else {
        return String::new();
    };
    let mut out_chars: Vec<char> = first.chars().collect();

    for next_text in chunks {
        let next_chars: Vec<char> = next_text.chars().collect();
        let tail_start = out_chars.len().saturating_sub(2 * n);
        let tail: String = out_chars[tail_start..].iter().collect();
        let head: String = next_chars.iter().take(n).collect();

        // `start_ind` is deliberately computed against `2 * n`, not the
        // tail's actual length, matching the original's slice arithmetic
        // (`out_text[-2 * n:]` can be shorter than `2 * n` near the start
        // of the document, but the correction still subtracts from `2 * n`).
        match tail.find(head.as_str()) {
            Some(found_at_byte) if !head.is_empty() => {
                let found_at_char = tail[..found_at_byte].chars().count();
                let start_ind = (2 * n).saturating_sub(found_at_char);
                out_chars.extend(next_chars.iter().skip(start_ind));
            }
            _ => {
                out_chars.push('\n');
                out_chars.extend(next_chars);
            }
        }
    }

    out_chars.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_overlapping_chunks_by_removing_duplicate_tail() {
        let chunks = vec![
            "the quick brown fox jumps over".to_string(),
            "jumps over the lazy dog".to_string(),
        ];
        let merged = merge_overlapping_texts(&chunks, 10);
        assert_eq!(merged, "the quick brown fox jumps over the lazy dog");
    }

    #[test]
    fn joins_with_newline_when_no_overlap_found() {
        let chunks = vec!["alpha beta gamma".to_string(), "delta epsilon zeta".to_string()];
        let merged = merge_overlapping_texts(&chunks, 5);
        assert_eq!(merged, "alpha beta gamma\ndelta epsilon zeta");
    }

    #[test]
    fn empty_input_yields_empty_string() {
        assert_eq!(merge_overlapping_texts(&[], 300), "");
    }
}
