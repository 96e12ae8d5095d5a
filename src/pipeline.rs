//! Per-location ordinance retrieval and extraction pipeline.
//!
//! Grounded on `elm/ords/download.py::download_county_ordinance` (search,
//! load, location down-select, content down-select, pick-best) and
//! `elm/ords/process.py::process_county` (text cleaning, value extraction,
//! side-effect writes). The eight steps run in one function, one per
//! location, driven by the orchestrator's fan-out.
//!
//! Three external collaborators stand in for the original's web-scraping
//! stack, which is out of scope here: [`SearchEngine`] replaces
//! `PlaywrightGoogleLinkSearch`, [`FileLoader`] replaces
//! `AsyncFileLoader`/PDF-vs-HTML reading, and [`TextSplitter`] replaces
//! `RecursiveCharacterTextSplitter`. The crate ships [`ParagraphChunker`] as
//! a ready default for the last of these.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::chunk::{chunk_paragraphs, split_paragraphs, CharEstimateTokenizer, Tokenizer};
use crate::document::{Document, DocumentKind, Location};
use crate::export;
use crate::extraction::DateExtractor;
use crate::llm::StructuredLlmCaller;
use crate::ordinance::OrdinanceExtractor;
use crate::service::{sanitize_filename, ServiceProvider, ServiceRequest};
use crate::structured_parser::{PromptGraphFactory, StructuredParser};
use crate::usage::UsageTracker;
use crate::validate::CountyValidator;

/// Search-engine collaborator: runs each query and returns one URL list per
/// query, in the order results were returned. Replaces
/// `PlaywrightGoogleLinkSearch.results`.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    async fn results(&self, queries: &[String], num_results: usize) -> Vec<Vec<String>>;
}

/// Fetches and extracts text for a single URL. Replaces
/// `AsyncFileLoader.fetch`/`fetch_all`; the default `fetch_all` just runs
/// `fetch` over every URL concurrently and drops failures, matching the
/// original's "load what we can, skip what errors" behavior.
#[async_trait]
pub trait FileLoader: Send + Sync {
    async fn fetch(&self, url: &str) -> anyhow::Result<Document>;

    async fn fetch_all(&self, urls: &[String]) -> Vec<Document> {
        let fetched = futures::future::join_all(urls.iter().map(|u| self.fetch(u))).await;
        fetched.into_iter().filter_map(Result::ok).collect()
    }
}

/// Splits a block of text into overlapping chunks for the content
/// validators. Replaces `langchain`'s `RecursiveCharacterTextSplitter`.
pub trait TextSplitter: Send + Sync {
    fn split_text(&self, text: &str) -> Vec<String>;
}

/// Default [`TextSplitter`] built on the crate's own paragraph chunker.
pub struct ParagraphChunker {
    separator: String,
    chunk_token_cap: usize,
    overlap: usize,
    tokenizer: Arc<dyn Tokenizer>,
}

impl ParagraphChunker {
    pub fn new(chunk_token_cap: usize, overlap: usize) -> Self {
        Self {
            separator: "\n\n".to_string(),
            chunk_token_cap,
            overlap,
            tokenizer: Arc::new(CharEstimateTokenizer),
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }
}

impl TextSplitter for ParagraphChunker {
    fn split_text(&self, text: &str) -> Vec<String> {
        let paragraphs = split_paragraphs(text, &self.separator);
        chunk_paragraphs(&paragraphs, self.chunk_token_cap, self.overlap, self.tokenizer.as_ref())
            .into_iter()
            .map(|c| c.text)
            .collect()
    }
}

/// The four fixed search-query templates, ported verbatim (minus the
/// original's debug-only leading index) from `download.py::QUESTION_TEMPLATES`.
const QUESTION_TEMPLATES: &[&str] = &[
    "wind energy conversion system zoning ordinances {location}",
    "{location} wind WECS zoning ordinance",
    "Where can I find the legal text for commercial wind energy conversion \
     system zoning ordinances in {location}?",
    "What is the specific legal information regarding zoning ordinances for \
     commercial wind energy conversion systems in {location}?",
];

fn build_queries(location: &Location) -> Vec<String> {
    let name = location.full_name();
    QUESTION_TEMPLATES.iter().map(|t| t.replace("{location}", &name)).collect()
}

/// Interleaves each query's result list round-robin and dedups, capping at
/// `num_urls`. Mirrors `_down_select_urls`'s `zip_longest` + `set` scan.
fn down_select_urls(search_results: Vec<Vec<String>>, num_urls: usize) -> Vec<String> {
    let max_len = search_results.iter().map(|r| r.len()).max().unwrap_or(0);
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    'outer: for i in 0..max_len {
        for results in &search_results {
            let Some(url) = results.get(i) else { continue };
            if url.is_empty() || !seen.insert(url.clone()) {
                continue;
            }
            out.push(url.clone());
            if out.len() == num_urls {
                break 'outer;
            }
        }
    }
    out
}

/// Runtime knobs the pipeline needs from configuration, gathered into one
/// struct so [`process_location`]'s signature doesn't balloon. Built by the
/// orchestrator from [`crate::config::OrdsConfig`]/[`crate::config::ResolvedDirs`].
pub struct PipelineParams {
    pub model: String,
    pub num_urls_to_check: usize,
    pub min_chunks_to_process: usize,
    pub num_to_recall: usize,
    pub bad_adder_threshold_ft: f64,
    pub location_score_thresh: f64,
    pub clean_dir: std::path::PathBuf,
    pub county_dbs_dir: std::path::PathBuf,
}

/// Non-null entries across the columns the original checks before deciding
/// a document actually contributed ordinance data. Mirrors
/// `process.py::_num_ords_in_doc`'s `CHECK_COLS` scan.
const CHECK_COLS: &[&str] = &["fixed_value", "mult_value", "adder", "min_dist", "max_dist", "value"];

pub(crate) fn count_ordinance_values(rows: &[Map<String, Value>]) -> usize {
    rows.iter()
        .flat_map(|row| CHECK_COLS.iter().filter_map(|col| row.get(*col)))
        .filter(|v| !v.is_null())
        .count()
}

/// Runs the full eight-step pipeline for one location: search, load,
/// filter-by-location, filter-by-content, pick-best, extract-text,
/// extract-values, side-effects. Returns `Ok(None)` if no ordinance
/// document could be found or confirmed for the location -- this is the
/// expected outcome for most counties, not an error.
pub async fn process_location(
    location: &Location,
    provider: Arc<ServiceProvider>,
    search: &dyn SearchEngine,
    file_loader: &dyn FileLoader,
    text_splitter: &dyn TextSplitter,
    factory: Arc<dyn PromptGraphFactory>,
    params: &PipelineParams,
    usage_tracker: Option<Arc<Mutex<UsageTracker>>>,
) -> anyhow::Result<Option<Document>> {
    let start = tokio::time::Instant::now();

    let Some(mut doc) = download_ordinance_document(location, provider.clone(), search, file_loader, text_splitter, params).await?
    else {
        record_usage(&provider, &usage_tracker, start).await?;
        return Ok(None);
    };

    doc.attrs.location = Some(location.full_name());
    doc.attrs.location_name = Some(location.full_name());
    record_usage(&provider, &usage_tracker, start).await?;

    let cleaned_text = doc.attrs.ordinance_text.clone().unwrap_or_default();
    doc.attrs.cleaned_ordinance_text = Some(cleaned_text.clone());

    let parser = StructuredParser::new(provider.clone(), "llm", params.model.clone(), usage_tracker.clone(), factory)
        .with_bad_adder_threshold_ft(params.bad_adder_threshold_ft);
    let rows = parser.parse(&cleaned_text).await?;
    doc.attrs.ordinance_values = Some(rows.clone());

    write_cleaned_text(&provider, location, &cleaned_text, &params.clean_dir).await?;

    let ord_count = count_ordinance_values(&rows);
    if ord_count > 0 {
        write_location_db(&provider, location, &rows, &params.county_dbs_dir).await?;
    }

    record_usage(&provider, &usage_tracker, start).await?;
    Ok(Some(doc))
}

/// Steps 1-6: search, load, filter-by-location, filter-by-content,
/// pick-best, extract-text. Mirrors `download_county_ordinance` plus the
/// `doc.metadata["ordinance_text"]`/`"date"` population from
/// `check_for_ordinance_info`.
async fn download_ordinance_document(
    location: &Location,
    provider: Arc<ServiceProvider>,
    search: &dyn SearchEngine,
    file_loader: &dyn FileLoader,
    text_splitter: &dyn TextSplitter,
    params: &PipelineParams,
) -> anyhow::Result<Option<Document>> {
    let queries = build_queries(location);
    let search_results = search.results(&queries, 10).await;
    let urls = down_select_urls(search_results, params.num_urls_to_check);

    let docs = file_loader.fetch_all(&urls).await;
    let docs: Vec<Document> = docs.into_iter().filter(|d| !d.is_empty()).collect();
    if docs.is_empty() {
        return Ok(None);
    }

    let validator_caller = StructuredLlmCaller::new(provider.clone(), "llm", params.model.clone(), None);
    let county_validator = CountyValidator::new(params.location_score_thresh);

    let checked = futures::future::join_all(
        docs.iter().map(|doc| county_validator.check(&validator_caller, doc, location)),
    )
    .await;

    let mut correct_location_docs: Vec<Document> = docs
        .into_iter()
        .zip(checked)
        .filter_map(|(doc, check)| match check {
            Ok(true) => Some(doc),
            _ => None,
        })
        .collect();

    // Sort PDFs first, then by descending text length, matching the
    // original's down-select ordering. Purely a processing-order hint: the
    // pick-best step below runs its own independent sort over the survivors,
    // so this ordering has no bearing on which document is ultimately chosen.
    correct_location_docs.sort_by(|a, b| {
        let pdf_rank = (b.kind() == DocumentKind::Pdf).cmp(&(a.kind() == DocumentKind::Pdf));
        pdf_rank.then_with(|| b.text().len().cmp(&a.text().len()))
    });

    let mut ord_docs = Vec::new();
    for mut doc in correct_location_docs {
        let content_caller = StructuredLlmCaller::new(provider.clone(), "llm", params.model.clone(), None);
        let chunks = text_splitter.split_text(doc.text());
        let mut extractor = OrdinanceExtractor::new(&content_caller, &chunks, params.num_to_recall);
        let found = extractor.parse(params.min_chunks_to_process).await?;
        if !found {
            continue;
        }

        let date = DateExtractor::new(&content_caller).parse(doc.raw_pages()).await?;
        doc.attrs.contains_ord_info = Some(true);
        doc.attrs.ordinance_text = Some(extractor.ordinance_text());
        doc.attrs.date = Some(date);
        ord_docs.push(doc);
    }

    Ok(pick_best_document(ord_docs))
}

/// Step 5: pick the document with the latest declared enactment date,
/// preferring PDFs and then longer text on ties, then later month/day.
/// Mirrors `_parse_all_ord_docs`/`_ord_doc_sorting_key`.
fn pick_best_document(docs: Vec<Document>) -> Option<Document> {
    docs.into_iter().max_by_key(|doc| {
        let (year, month, day) = doc.attrs.date.unwrap_or((Some(-1), Some(-1), Some(-1)));
        (
            year.unwrap_or(-1),
            doc.kind() == DocumentKind::Pdf,
            doc.text().len(),
            month.map(|m| m as i32).unwrap_or(-1),
            day.map(|d| d as i32).unwrap_or(-1),
        )
    })
}

async fn write_cleaned_text(
    provider: &ServiceProvider,
    location: &Location,
    cleaned_text: &str,
    clean_dir: &Path,
) -> anyhow::Result<()> {
    let path = clean_dir.join(format!("{} Summary.txt", sanitize_filename(&location.full_name())));
    provider
        .call("file_writer", ServiceRequest::WriteFile { path, contents: cleaned_text.to_string() })
        .await?
        .into_write_file()?;
    Ok(())
}

async fn write_location_db(
    provider: &ServiceProvider,
    location: &Location,
    rows: &[Map<String, Value>],
    county_dbs_dir: &Path,
) -> anyhow::Result<()> {
    let path = county_dbs_dir.join(format!("{} Ordinances.csv", sanitize_filename(&location.full_name())));
    provider
        .call("file_writer", ServiceRequest::WriteFile { path, contents: export::rows_to_csv(rows) })
        .await?
        .into_write_file()?;
    Ok(())
}

async fn record_usage(
    provider: &ServiceProvider,
    usage_tracker: &Option<Arc<Mutex<UsageTracker>>>,
    start: tokio::time::Instant,
) -> anyhow::Result<()> {
    let Some(tracker) = usage_tracker else { return Ok(()) };
    let mut guard = tracker.lock().await;
    guard.add_elapsed(start.elapsed());
    let snapshot = guard.clone();
    drop(guard);
    provider.call("usage_recorder", ServiceRequest::UsageRecord(snapshot)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_queries_substitutes_location_in_all_four_templates() {
        let location = Location::new("El Paso", "Colorado");
        let queries = build_queries(&location);
        assert_eq!(queries.len(), 4);
        assert!(queries[0].contains("El Paso County, Colorado"));
        assert!(queries[1].starts_with("El Paso County, Colorado"));
    }

    #[test]
    fn down_select_urls_round_robins_and_dedups() {
        let results = vec![
            vec!["a".to_string(), "b".to_string()],
            vec!["c".to_string(), "a".to_string()],
        ];
        let urls = down_select_urls(results, 3);
        assert_eq!(urls, vec!["a".to_string(), "c".to_string(), "b".to_string()]);
    }

    #[test]
    fn down_select_urls_caps_at_num_urls() {
        let results = vec![vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()]];
        let urls = down_select_urls(results, 2);
        assert_eq!(urls.len(), 2);
    }

    #[test]
    fn pick_best_document_prefers_latest_year_then_pdf_then_longer_text() {
        let mut older = Document::new(DocumentKind::Html, vec!["short text".into()]);
        older.attrs.date = Some((Some(2015), None, None));

        let mut newer_html = Document::new(DocumentKind::Html, vec!["a slightly longer chunk of text".into()]);
        newer_html.attrs.date = Some((Some(2022), None, None));

        let mut newer_pdf = Document::new(DocumentKind::Pdf, vec!["short".into()]);
        newer_pdf.attrs.date = Some((Some(2022), None, None));

        let best = pick_best_document(vec![older, newer_html, newer_pdf]).unwrap();
        assert_eq!(best.kind(), DocumentKind::Pdf);
    }

    #[test]
    fn pick_best_document_empty_input_is_none() {
        assert!(pick_best_document(vec![]).is_none());
    }

    #[test]
    fn count_ordinance_values_counts_non_null_check_cols_only() {
        let mut row = Map::new();
        row.insert("feature".to_string(), Value::String("struct".into()));
        row.insert("value".to_string(), Value::from(100.0));
        row.insert("mult_value".to_string(), Value::Null);
        assert_eq!(count_ordinance_values(&[row]), 1);
    }
}
