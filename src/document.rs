//! Document and Location data model.
//!
//! `Document` is the contract boundary with the (out-of-scope) file-loader
//! collaborator: callers hand us pages of already-extracted text, and we
//! derive normalized `text`/`raw_pages` views and carry a mutable attribute
//! bag that pipeline stages fill in as they go.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A (year, month, day) triple. Any component may be absent if the source
/// document only specified a partial date.
pub type PartialDate = (Option<i32>, Option<u32>, Option<u32>);

/// Known, typed attributes a pipeline stage may read or write on a
/// `Document`. Unknown keys fall through to `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentAttrs {
    pub source: Option<String>,
    pub location: Option<String>,
    pub location_name: Option<String>,
    pub cache_fn: Option<String>,
    pub out_fp: Option<String>,
    pub date: Option<PartialDate>,
    pub contains_ord_info: Option<bool>,
    pub ordinance_text: Option<String>,
    pub cleaned_ordinance_text: Option<String>,
    pub ordinance_values: Option<Vec<serde_json::Map<String, Value>>>,
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

/// How a document's raw text was produced, used to pick `text`/`raw_pages`
/// normalization rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentKind {
    Pdf,
    Html,
}

/// An ordered sequence of text pages plus a mutable attribute bag.
///
/// Blank pages are dropped at construction. `text()` and `raw_pages()` are
/// derived and cached the first time they're computed.
#[derive(Debug, Clone)]
pub struct Document {
    kind: DocumentKind,
    pages: Vec<String>,
    pub attrs: DocumentAttrs,
    text_cache: Arc<once_cell_text::OnceText>,
}

mod once_cell_text {
    use std::sync::OnceLock;

    /// Minimal lazily-initialized cache cell without pulling in `once_cell`
    /// as a dependency (the std `OnceLock` added in 1.70 covers this).
    #[derive(Debug, Default)]
    pub struct OnceText {
        pub text: OnceLock<String>,
        pub raw_pages: OnceLock<Vec<String>>,
    }
}

const PDF_HEADER_FOOTER_PATTERNS: &[&str] = &["Page ", "CODE OF ORDINANCES", "---"];
const CONVERSION_ARTIFACTS: &[(&str, &str)] = &[("\u{0c}", "\n"), ("\r\n", "\n"), ("\r", "\n")];

impl Document {
    /// Construct a document from raw pages, dropping blanks.
    pub fn new(kind: DocumentKind, pages: Vec<String>) -> Self {
        let pages = pages.into_iter().filter(|p| !p.trim().is_empty()).collect();
        Self {
            kind,
            pages,
            attrs: DocumentAttrs::default(),
            text_cache: Arc::new(once_cell_text::OnceText::default()),
        }
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn pages(&self) -> &[String] {
        &self.pages
    }

    /// Normalized, concatenated text of the whole document.
    pub fn text(&self) -> &str {
        self.text_cache
            .text
            .get_or_init(|| self.build_text())
            .as_str()
    }

    /// Small subset of pages kept for location-validation voting.
    pub fn raw_pages(&self) -> &[String] {
        self.text_cache
            .raw_pages
            .get_or_init(|| self.build_raw_pages())
            .as_slice()
    }

    /// `true` iff the document's normalized text contains no alphabetic
    /// word of length >= 3.
    pub fn is_empty(&self) -> bool {
        !self
            .text()
            .split(|c: char| !c.is_alphabetic())
            .any(|word| word.chars().count() >= 3)
    }

    fn build_text(&self) -> String {
        match self.kind {
            DocumentKind::Pdf => {
                let cleaned: Vec<String> = self
                    .pages
                    .iter()
                    .map(|p| clean_pdf_page(p))
                    .filter(|p| !p.trim().is_empty())
                    .collect();
                cleaned.join("\n")
            }
            DocumentKind::Html => {
                let cleaned: Vec<String> = self.pages.iter().map(|p| strip_html(p)).collect();
                cleaned.join("\n")
            }
        }
    }

    fn build_raw_pages(&self) -> Vec<String> {
        match self.kind {
            DocumentKind::Pdf => {
                const HEAD: usize = 3;
                let n = self.pages.len();
                if n <= HEAD + 2 {
                    self.pages.clone()
                } else {
                    let mut out: Vec<String> = self.pages[..HEAD].to_vec();
                    out.extend_from_slice(&self.pages[n - 2..]);
                    out
                }
            }
            DocumentKind::Html => self.pages.clone(),
        }
    }
}

fn clean_pdf_page(page: &str) -> String {
    let mut text = page.to_string();
    for (from, to) in CONVERSION_ARTIFACTS {
        text = text.replace(from, to);
    }
    text.lines()
        .filter(|line| {
            let trimmed = line.trim();
            !PDF_HEADER_FOOTER_PATTERNS
                .iter()
                .any(|pat| trimmed.starts_with(pat))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_html(page: &str) -> String {
    // Out-of-scope collaborators are expected to hand us pre-rendered text;
    // this is a defensive fallback for stray markup that slips through.
    let mut out = String::with_capacity(page.len());
    let mut in_tag = false;
    for c in page.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// The county/parish-level unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub state: String,
    /// `true` if this is a parish (Louisiana) rather than a county.
    pub is_parish: bool,
    pub fips: Option<String>,
}

impl Location {
    pub fn new(name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: state.into(),
            is_parish: false,
            fips: None,
        }
    }

    pub fn full_name(&self) -> String {
        let unit = if self.is_parish { "Parish" } else { "County" };
        format!("{} {}, {}", self.name, unit, self.state)
    }

    /// Parse a roster CSV with required `County`/`State` columns and
    /// optional `County Type` (set to `"Parish"` for Louisiana parishes) and
    /// `FIPS` columns. Grounded on
    /// `elm/ords/utilities/counties.py::load_counties_from_fp`'s required
    /// columns; the original also left-joins against a master county/website
    /// table to backfill FIPS codes, which is out of scope here (no website
    /// lookup collaborator) -- a roster missing a cell simply leaves that
    /// field unset rather than being dropped with a warning.
    pub fn load_roster_csv(contents: &str) -> anyhow::Result<Vec<Location>> {
        let mut lines = contents.lines().filter(|l| !l.trim().is_empty());
        let header = lines.next().context("roster CSV is empty")?;
        let columns: Vec<&str> = header.split(',').map(|c| c.trim()).collect();

        let county_idx = columns
            .iter()
            .position(|&c| c.eq_ignore_ascii_case("County"))
            .context("roster CSV is missing a required \"County\" column")?;
        let state_idx = columns
            .iter()
            .position(|&c| c.eq_ignore_ascii_case("State"))
            .context("roster CSV is missing a required \"State\" column")?;
        let type_idx = columns.iter().position(|&c| c.eq_ignore_ascii_case("County Type"));
        let fips_idx = columns.iter().position(|&c| c.eq_ignore_ascii_case("FIPS"));

        let mut locations = Vec::new();
        for line in lines {
            let fields: Vec<&str> = line.split(',').map(|f| f.trim()).collect();
            let Some(county) = fields.get(county_idx).filter(|f| !f.is_empty()) else { continue };
            let Some(state) = fields.get(state_idx).filter(|f| !f.is_empty()) else { continue };

            let is_parish = type_idx
                .and_then(|i| fields.get(i))
                .is_some_and(|t| t.eq_ignore_ascii_case("Parish"));
            let fips = fips_idx.and_then(|i| fields.get(i)).filter(|f| !f.is_empty()).map(|f| f.to_string());

            locations.push(Location {
                name: county.to_string(),
                state: state.to_string(),
                is_parish,
                fips,
            });
        }
        Ok(locations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_blank_pages() {
        let doc = Document::new(
            DocumentKind::Html,
            vec!["hello world".into(), "   ".into(), "".into(), "more text".into()],
        );
        assert_eq!(doc.pages().len(), 2);
    }

    #[test]
    fn empty_invariant_holds_for_short_tokens_only() {
        let doc = Document::new(DocumentKind::Html, vec!["12 3 a. 7".into()]);
        assert!(doc.is_empty());

        let doc2 = Document::new(DocumentKind::Html, vec!["12 3 cat 7".into()]);
        assert!(!doc2.is_empty());
    }

    #[test]
    fn pdf_strips_header_footer_lines() {
        let doc = Document::new(
            DocumentKind::Pdf,
            vec!["Page 1\nSection 4.2 Setbacks\nCODE OF ORDINANCES".into()],
        );
        assert!(!doc.text().contains("Page 1"));
        assert!(doc.text().contains("Section 4.2 Setbacks"));
    }

    #[test]
    fn html_strips_tags() {
        let doc = Document::new(DocumentKind::Html, vec!["<p>Hello <b>World</b></p>".into()]);
        assert_eq!(doc.text().trim(), "Hello World");
    }

    #[test]
    fn raw_pages_pdf_keeps_head_and_tail() {
        let pages: Vec<String> = (0..10).map(|i| format!("page body {i}")).collect();
        let doc = Document::new(DocumentKind::Pdf, pages);
        let raw = doc.raw_pages();
        assert_eq!(raw.len(), 5);
        assert!(raw[0].contains("page body 0"));
        assert!(raw[3].contains("page body 8"));
        assert!(raw[4].contains("page body 9"));
    }

    #[test]
    fn full_name_formats_county_and_parish() {
        let county = Location::new("El Paso", "Colorado");
        assert_eq!(county.full_name(), "El Paso County, Colorado");

        let mut parish = Location::new("Orleans", "Louisiana");
        parish.is_parish = true;
        assert_eq!(parish.full_name(), "Orleans Parish, Louisiana");
    }

    #[test]
    fn load_roster_csv_parses_county_state_type_and_fips() {
        let csv = "County,State,County Type,FIPS\nEl Paso,Colorado,,08041\nOrleans,Louisiana,Parish,22071\n";
        let locations = Location::load_roster_csv(csv).unwrap();
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[0].full_name(), "El Paso County, Colorado");
        assert_eq!(locations[0].fips.as_deref(), Some("08041"));
        assert!(locations[1].is_parish);
        assert_eq!(locations[1].full_name(), "Orleans Parish, Louisiana");
    }

    #[test]
    fn load_roster_csv_requires_county_and_state_columns() {
        let csv = "County,FIPS\nEl Paso,08041\n";
        assert!(Location::load_roster_csv(csv).is_err());
    }

    #[test]
    fn load_roster_csv_skips_rows_with_missing_required_fields() {
        let csv = "County,State\nEl Paso,Colorado\n,Texas\n";
        let locations = Location::load_roster_csv(csv).unwrap();
        assert_eq!(locations.len(), 1);
    }
}
