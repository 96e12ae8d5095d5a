//! Per-location ordinance table formatting and CSV export.
//!
//! Grounded on `elm/ords/process.py`'s `OUT_COLS`, `_db_results`, and
//! `_formatted_db`: each structured-parser row is enriched with document
//! and location metadata, then projected onto a fixed column order for
//! output. No `csv` crate dependency -- the original's transformation is
//! a header line plus one row of at most 17 known scalar fields, which a
//! hand-rolled writer covers without pulling in a table library.

use serde_json::{Map, Value};

use crate::document::{Document, Location, PartialDate};

/// Column order for the output table. Mirrors `process.py::OUT_COLS`.
pub const OUT_COLS: &[&str] = &[
    "county",
    "state",
    "FIPS",
    "feature",
    "fixed_value",
    "mult_value",
    "mult_type",
    "adder",
    "min_dist",
    "max_dist",
    "value",
    "units",
    "ord_year",
    "last_updated",
    "section",
    "source",
    "comment",
];

/// Stamp each structured-parser row with document/location metadata the
/// parser itself doesn't know about: the source URL, the enactment year (if
/// positive), today's date, and the location's FIPS/county/state. Mirrors
/// `process.py::_db_results`.
pub fn enrich_rows(
    doc: &Document,
    location: &Location,
    rows: Vec<Map<String, Value>>,
    today: &str,
) -> Vec<Map<String, Value>> {
    let source = doc.attrs.source.clone();
    let year = ord_year(doc.attrs.date);

    rows.into_iter()
        .map(|mut row| {
            insert_opt(&mut row, "source", source.clone());
            insert_opt(&mut row, "ord_year", year.map(|y| y.into()));
            row.insert("last_updated".to_string(), Value::String(today.to_string()));
            insert_opt(&mut row, "FIPS", location.fips.clone());
            row.insert("county".to_string(), Value::String(location.name.clone()));
            row.insert("state".to_string(), Value::String(location.state.clone()));
            row
        })
        .collect()
}

fn insert_opt(row: &mut Map<String, Value>, key: &str, value: Option<impl Into<Value>>) {
    row.insert(key.to_string(), value.map(Into::into).unwrap_or(Value::Null));
}

/// The enactment year, or `None` if absent or non-positive. Mirrors
/// `_db_results`'s `year if year is not None and year > 0 else None`.
fn ord_year(date: Option<PartialDate>) -> Option<i32> {
    date.and_then(|(year, ..)| year).filter(|&y| y > 0)
}

/// Renders rows as CSV, projecting onto [`OUT_COLS`] (columns absent from
/// every row are dropped, matching `_formatted_db`'s
/// `[col for col in OUT_COLS if col in db.columns]`).
pub fn rows_to_csv(rows: &[Map<String, Value>]) -> String {
    let present_cols: Vec<&str> = OUT_COLS
        .iter()
        .copied()
        .filter(|col| rows.iter().any(|row| row.contains_key(*col)))
        .collect();

    let mut out = String::new();
    out.push_str(&present_cols.join(","));
    out.push('\n');
    for row in rows {
        let fields: Vec<String> = present_cols.iter().map(|col| csv_field(row.get(*col))).collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

fn csv_field(value: Option<&Value>) -> String {
    let rendered = match value {
        None | Some(Value::Null) => return String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    if rendered.contains(',') || rendered.contains('"') || rendered.contains('\n') {
        format!("\"{}\"", rendered.replace('"', "\"\""))
    } else {
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, DocumentKind};
    use serde_json::json;

    fn sample_row() -> Map<String, Value> {
        json!({"feature": "struct", "value": 150.0}).as_object().unwrap().clone()
    }

    #[test]
    fn enrich_rows_stamps_year_only_when_positive() {
        let mut doc = Document::new(DocumentKind::Html, vec!["text".into()]);
        doc.attrs.source = Some("https://example.com/ord.pdf".into());
        doc.attrs.date = Some((Some(2021), Some(3), None));
        let location = Location::new("El Paso", "Colorado");

        let rows = enrich_rows(&doc, &location, vec![sample_row()], "07/30/2026");
        assert_eq!(rows[0]["ord_year"], 2021);
        assert_eq!(rows[0]["source"], "https://example.com/ord.pdf");
        assert_eq!(rows[0]["last_updated"], "07/30/2026");
        assert_eq!(rows[0]["county"], "El Paso");
    }

    #[test]
    fn enrich_rows_nulls_nonpositive_year() {
        let mut doc = Document::new(DocumentKind::Html, vec!["text".into()]);
        doc.attrs.date = Some((Some(-1), None, None));
        let location = Location::new("El Paso", "Colorado");
        let rows = enrich_rows(&doc, &location, vec![sample_row()], "07/30/2026");
        assert!(rows[0]["ord_year"].is_null());
    }

    #[test]
    fn rows_to_csv_drops_absent_columns_and_quotes_commas() {
        let mut row = sample_row();
        row.insert("comment".to_string(), json!("has, a comma"));
        let csv = rows_to_csv(&[row]);
        let mut lines = csv.lines();
        assert_eq!(lines.next().unwrap(), "feature,value,comment");
        assert_eq!(lines.next().unwrap(), "struct,150.0,\"has, a comma\"");
    }

    #[test]
    fn rows_to_csv_empty_input_has_no_columns() {
        assert_eq!(rows_to_csv(&[]), "\n");
    }
}
