//! Bulk loading of raw census rows from JSON files into the raw store.

use std::fs;
use std::path::Path;
use tracing::info;

use crate::domain::RawRecord;
use crate::error::{PipelineError, Result};

/// Reads a JSON array of raw records, or NDJSON with one record per line.
/// Blank NDJSON lines are skipped.
pub fn read_raw_file(path: &Path) -> Result<Vec<RawRecord>> {
    let content = fs::read_to_string(path)?;
    let records = parse_raw(&content)?;
    info!(path = %path.display(), rows = records.len(), "Read raw records");
    Ok(records)
}

pub fn parse_raw(content: &str) -> Result<Vec<RawRecord>> {
    if content.trim_start().starts_with('[') {
        return serde_json::from_str(content).map_err(|source| PipelineError::RawInput { line: 1, source });
    }
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|source| PipelineError::RawInput {
                line: idx + 1,
                source,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::cleaning::{clean, CleaningConfig};

    #[test]
    fn parses_array_and_ndjson() {
        let array = r#"[{"source_file": "a.csv", "sex": "Men"}, {"source_file": "b.csv"}]"#;
        assert_eq!(parse_raw(array).unwrap().len(), 2);

        let ndjson = "{\"source_file\": \"a.csv\"}\n\n{\"source_file\": \"b.csv\", \"total_nominal_income\": 10}\n";
        let rows = parse_raw(ndjson).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].total_nominal_income, "10");
    }

    #[test]
    fn numeric_json_survives_cleaning() {
        let ndjson = concat!(
            r#"{"source_file": "a.csv", "sex": "Men", "race_or_color": "White", "#,
            r#""total_nominal_income": 2000.0, "occupied_population": 10.0}"#,
            "\n",
            r#"{"source_file": "b.csv", "sex": "Men", "race_or_color": "White", "#,
            r#""total_nominal_income": 12345678901234567890.0, "occupied_population": 1}"#,
        );
        let mut rows = parse_raw(ndjson).unwrap();
        for (i, row) in rows.iter_mut().enumerate() {
            row.row_number = i as u64 + 1;
        }
        let out = clean(&rows, &CleaningConfig::default()).unwrap();
        assert!(out.quarantined.is_empty(), "{:?}", out.quarantined);
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].occupied_population, Some(10));
        assert_eq!(out.records[0].average_monthly_income, Some(200.0));
        assert_eq!(out.records[1].total_nominal_income, 12345678901234567890.0);
    }

    #[test]
    fn reports_the_failing_line() {
        let ndjson = "{\"source_file\": \"a.csv\"}\nnot json\n";
        match parse_raw(ndjson) {
            Err(PipelineError::RawInput { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
