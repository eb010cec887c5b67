//! Cleaning & metric stage: raw text rows in, typed rows with the derived
//! income indicator out.

use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

use crate::domain::{self, CleanedRecord, RawRecord};
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::pipeline::numeric::NumberFormat;

/// What to do when two raw rows produce the same
/// `(geography, sex, race_or_color)` key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Fail the run, naming the key and both raw rows.
    #[default]
    Reject,
    /// Keep the lowest raw row number; later rows go to quarantine.
    KeepFirst,
    /// Sum incomes and occupied populations, then re-derive the average.
    Sum,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    pub number_format: NumberFormat,
    /// Markers treated as missing in addition to empty text.
    pub null_tokens: Vec<String>,
    pub duplicate_policy: DuplicatePolicy,
}

impl CleaningConfig {
    fn is_missing(&self, text: &str) -> bool {
        text.is_empty() || self.null_tokens.iter().any(|t| t.trim() == text)
    }
}

/// A raw row kept out of the cleaned layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantinedRow {
    pub row_number: u64,
    pub source_file: String,
    pub reason: QuarantineReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuarantineReason {
    MissingField { field: String },
    Unparsable { field: String, value: String },
    Duplicate { kept_row: u64 },
    /// Summing this row into its key would make `field` non-finite.
    Overflow { field: String, kept_row: u64 },
}

impl QuarantineReason {
    pub fn kind(&self) -> &'static str {
        match self {
            QuarantineReason::MissingField { .. } => "missing_field",
            QuarantineReason::Unparsable { .. } => "unparsable",
            QuarantineReason::Duplicate { .. } => "duplicate",
            QuarantineReason::Overflow { .. } => "overflow",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CleaningOutcome {
    /// Cleaned rows in canonical `(geography_code, sex, race_or_color)` order.
    pub records: Vec<CleanedRecord>,
    pub quarantined: Vec<QuarantinedRow>,
    /// Rows folded away by `KeepFirst` or `Sum`.
    pub duplicates_resolved: usize,
}

type OwnedKey = (String, String, String);

/// Types every raw row, quarantines the malformed ones and enforces key
/// uniqueness according to `config.duplicate_policy`.
#[instrument(skip_all, fields(raw_rows = raw.len(), policy = ?config.duplicate_policy))]
pub fn clean(raw: &[RawRecord], config: &CleaningConfig) -> Result<CleaningOutcome> {
    let mut ordered: Vec<&RawRecord> = raw.iter().collect();
    ordered.sort_by_key(|r| r.row_number);

    let mut by_key: BTreeMap<OwnedKey, (u64, CleanedRecord)> = BTreeMap::new();
    let mut outcome = CleaningOutcome::default();

    for row in ordered {
        let record = match type_row(row, config) {
            Ok(record) => record,
            Err(reason) => {
                debug!(row = row.row_number, reason = reason.kind(), "Quarantining raw row");
                metrics::cleaning::row_quarantined(reason.kind());
                outcome.quarantined.push(QuarantinedRow {
                    row_number: row.row_number,
                    source_file: row.source_file.trim().to_string(),
                    reason,
                });
                continue;
            }
        };

        let key = (
            record.geography_code.clone(),
            record.sex.clone(),
            record.race_or_color.clone(),
        );
        match by_key.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert((row.row_number, record));
            }
            Entry::Occupied(mut slot) => {
                let first_row = slot.get().0;
                match config.duplicate_policy {
                    DuplicatePolicy::Reject => {
                        let (geography_code, sex, race_or_color) = slot.key().clone();
                        return Err(PipelineError::DuplicateKey {
                            geography_code,
                            sex,
                            race_or_color,
                            first_row,
                            duplicate_row: row.row_number,
                        });
                    }
                    DuplicatePolicy::KeepFirst => {
                        warn!(
                            kept_row = first_row,
                            dropped_row = row.row_number,
                            geography = %slot.key().0,
                            "Dropping duplicate cleaned key"
                        );
                        outcome.quarantined.push(QuarantinedRow {
                            row_number: row.row_number,
                            source_file: record.source_file,
                            reason: QuarantineReason::Duplicate { kept_row: first_row },
                        });
                        metrics::cleaning::row_quarantined("duplicate");
                    }
                    DuplicatePolicy::Sum => {
                        let Some(combined) = merged(&slot.get().1, &record) else {
                            warn!(
                                kept_row = first_row,
                                dropped_row = row.row_number,
                                geography = %slot.key().0,
                                "Summed income is not finite; quarantining duplicate"
                            );
                            let reason = QuarantineReason::Overflow {
                                field: "total_nominal_income".to_string(),
                                kept_row: first_row,
                            };
                            metrics::cleaning::row_quarantined(reason.kind());
                            outcome.quarantined.push(QuarantinedRow {
                                row_number: row.row_number,
                                source_file: record.source_file,
                                reason,
                            });
                            continue;
                        };
                        debug!(
                            into_row = first_row,
                            merged_row = row.row_number,
                            "Summing duplicate cleaned key"
                        );
                        slot.get_mut().1 = combined;
                    }
                }
                outcome.duplicates_resolved += 1;
                metrics::cleaning::duplicate_resolved();
            }
        }
    }

    outcome.records = by_key.into_values().map(|(_, record)| record).collect();
    metrics::cleaning::rows_cleaned(outcome.records.len());
    info!(
        cleaned = outcome.records.len(),
        quarantined = outcome.quarantined.len(),
        duplicates_resolved = outcome.duplicates_resolved,
        "Cleaning finished"
    );
    Ok(outcome)
}

/// `target` with `other` summed in, or `None` when the income total would
/// stop being finite.
fn merged(target: &CleanedRecord, other: &CleanedRecord) -> Option<CleanedRecord> {
    let total = target.total_nominal_income + other.total_nominal_income;
    if !total.is_finite() {
        return None;
    }
    let mut merged = target.clone();
    merged.total_nominal_income = total;
    merged.occupied_population = match (target.occupied_population, other.occupied_population) {
        (Some(a), Some(b)) => Some(a.saturating_add(b)),
        (a, None) => a,
        (None, b) => b,
    };
    merged.rederive_average();
    Some(merged)
}

fn type_row(
    raw: &RawRecord,
    config: &CleaningConfig,
) -> std::result::Result<CleanedRecord, QuarantineReason> {
    let source_file = required(config, "source_file", &raw.source_file)?;
    let geography_code = domain::geography_code(source_file);
    if geography_code.is_empty() {
        return Err(QuarantineReason::MissingField {
            field: "source_file".to_string(),
        });
    }
    let sex = required(config, "sex", &raw.sex)?;
    let race_or_color = required(config, "race_or_color", &raw.race_or_color)?;

    let income_text = required(config, "total_nominal_income", &raw.total_nominal_income)?;
    let total_nominal_income = config
        .number_format
        .parse_decimal(income_text)
        .ok_or_else(|| unparsable("total_nominal_income", income_text))?;

    let area_km2 = optional(config, "area_km2", &raw.area_km2, |f, t| f.parse_decimal(t))?;
    let population_density = optional(config, "population_density", &raw.population_density, |f, t| {
        f.parse_decimal(t)
    })?;
    let occupied_population = optional(config, "occupied_population", &raw.occupied_population, |f, t| {
        f.parse_count(t)
    })?;

    Ok(CleanedRecord {
        geography_id: domain::geography_id(&geography_code),
        geography_code,
        source_file: source_file.to_string(),
        area_km2,
        population_density,
        total_nominal_income,
        occupied_population,
        average_monthly_income: domain::average_monthly_income(
            total_nominal_income,
            occupied_population,
        ),
        sex: sex.to_string(),
        race_or_color: race_or_color.to_string(),
    })
}

fn required<'a>(
    config: &CleaningConfig,
    field: &str,
    text: &'a str,
) -> std::result::Result<&'a str, QuarantineReason> {
    let text = text.trim();
    if config.is_missing(text) {
        Err(QuarantineReason::MissingField {
            field: field.to_string(),
        })
    } else {
        Ok(text)
    }
}

fn optional<T>(
    config: &CleaningConfig,
    field: &str,
    text: &str,
    parse: impl Fn(&NumberFormat, &str) -> Option<T>,
) -> std::result::Result<Option<T>, QuarantineReason> {
    let text = text.trim();
    if config.is_missing(text) {
        return Ok(None);
    }
    parse(&config.number_format, text)
        .map(Some)
        .ok_or_else(|| unparsable(field, text))
}

fn unparsable(field: &str, value: &str) -> QuarantineReason {
    QuarantineReason::Unparsable {
        field: field.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(row: u64, source: &str, income: &str, occupied: &str, sex: &str) -> RawRecord {
        RawRecord {
            row_number: row,
            source_file: source.to_string(),
            area_km2: "1521.1".to_string(),
            population_density: "7398.3".to_string(),
            total_nominal_income: income.to_string(),
            occupied_population: occupied.to_string(),
            sex: sex.to_string(),
            race_or_color: "White".to_string(),
        }
    }

    #[test]
    fn derives_average_and_nulls_zero_population() {
        let rows = vec![
            raw(1, "geo_a.csv", "10000", "5", "Men"),
            raw(2, "geo_b.csv", "8000", "0", "Men"),
            raw(3, "geo_c.csv", "8000", "", "Men"),
        ];
        let out = clean(&rows, &CleaningConfig::default()).unwrap();
        assert_eq!(out.records.len(), 3);
        assert_eq!(out.records[0].average_monthly_income, Some(2000.0));
        assert_eq!(out.records[1].average_monthly_income, None);
        assert_eq!(out.records[1].occupied_population, Some(0));
        assert_eq!(out.records[2].average_monthly_income, None);
        assert_eq!(out.records[2].occupied_population, None);

        for r in &out.records {
            let zero_or_null = r.occupied_population.map_or(true, |n| n == 0);
            assert_eq!(zero_or_null, r.average_monthly_income.is_none());
        }
    }

    #[test]
    fn quarantines_malformed_rows_without_failing() {
        let rows = vec![
            raw(1, "geo_a.csv", "not-a-number", "5", "Men"),
            raw(2, "geo_a.csv", "100", "5", ""),
            raw(3, "geo_a.csv", "100", "-3", "Women"),
            raw(4, "geo_b.csv", "100", "4", "Men"),
        ];
        let out = clean(&rows, &CleaningConfig::default()).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].geography_code, "geo_b");
        assert_eq!(out.quarantined.len(), 3);
        assert_eq!(
            out.quarantined[0].reason,
            QuarantineReason::Unparsable {
                field: "total_nominal_income".to_string(),
                value: "not-a-number".to_string()
            }
        );
        assert_eq!(
            out.quarantined[1].reason,
            QuarantineReason::MissingField {
                field: "sex".to_string()
            }
        );
        assert_eq!(out.quarantined[2].reason.kind(), "unparsable");
    }

    #[test]
    fn missing_income_is_quarantined_but_missing_area_is_null() {
        let mut no_area = raw(1, "geo_a.csv", "100", "2", "Men");
        no_area.area_km2 = "  ".to_string();
        let rows = vec![no_area, raw(2, "geo_b.csv", "", "2", "Men")];
        let out = clean(&rows, &CleaningConfig::default()).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].area_km2, None);
        assert_eq!(out.quarantined[0].row_number, 2);
    }

    #[test]
    fn null_tokens_count_as_missing() {
        let config = CleaningConfig {
            null_tokens: vec!["-".to_string()],
            ..CleaningConfig::default()
        };
        let out = clean(&[raw(1, "geo_a.csv", "100", "-", "Men")], &config).unwrap();
        assert_eq!(out.records[0].occupied_population, None);
        assert!(out.quarantined.is_empty());
    }

    #[test]
    fn reject_policy_names_the_duplicate_key() {
        let rows = vec![
            raw(1, "dir/geo_a.csv", "100", "1", "Men"),
            raw(7, "geo_a.txt", "300", "1", "Men"),
        ];
        let err = clean(&rows, &CleaningConfig::default()).unwrap_err();
        match err {
            PipelineError::DuplicateKey {
                geography_code,
                sex,
                first_row,
                duplicate_row,
                ..
            } => {
                assert_eq!(geography_code, "geo_a");
                assert_eq!(sex, "Men");
                assert_eq!(first_row, 1);
                assert_eq!(duplicate_row, 7);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn keep_first_policy_keeps_lowest_row_number() {
        let config = CleaningConfig {
            duplicate_policy: DuplicatePolicy::KeepFirst,
            ..CleaningConfig::default()
        };
        // Input order differs from row order on purpose.
        let rows = vec![
            raw(9, "geo_a.csv", "900", "1", "Men"),
            raw(2, "geo_a.csv", "200", "1", "Men"),
        ];
        let out = clean(&rows, &config).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].total_nominal_income, 200.0);
        assert_eq!(out.duplicates_resolved, 1);
        assert_eq!(
            out.quarantined[0].reason,
            QuarantineReason::Duplicate { kept_row: 2 }
        );
    }

    #[test]
    fn sum_policy_aggregates_and_rederives() {
        let config = CleaningConfig {
            duplicate_policy: DuplicatePolicy::Sum,
            ..CleaningConfig::default()
        };
        let rows = vec![
            raw(1, "geo_a.csv", "3000", "2", "Men"),
            raw(2, "geo_a.csv", "1000", "", "Men"),
            raw(3, "geo_a.csv", "2000", "2", "Men"),
        ];
        let out = clean(&rows, &config).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].total_nominal_income, 6000.0);
        assert_eq!(out.records[0].occupied_population, Some(4));
        assert_eq!(out.records[0].average_monthly_income, Some(1500.0));
        assert_eq!(out.duplicates_resolved, 2);
        assert!(out.quarantined.is_empty());
    }

    #[test]
    fn sum_policy_quarantines_rows_that_would_overflow() {
        let config = CleaningConfig {
            duplicate_policy: DuplicatePolicy::Sum,
            ..CleaningConfig::default()
        };
        let big = format!("{}", 1e308_f64);
        let rows = vec![
            raw(1, "geo_a.csv", &big, "1", "Men"),
            raw(2, "geo_a.csv", &big, "1", "Men"),
        ];
        let out = clean(&rows, &config).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].total_nominal_income, 1e308);
        assert_eq!(out.records[0].occupied_population, Some(1));
        assert_eq!(out.records[0].average_monthly_income, Some(1e308));
        assert_eq!(
            out.quarantined[0].reason,
            QuarantineReason::Overflow {
                field: "total_nominal_income".to_string(),
                kept_row: 1,
            }
        );
        assert_eq!(out.duplicates_resolved, 0);
    }

    #[test]
    fn output_is_in_canonical_order() {
        let rows = vec![
            raw(1, "geo_b.csv", "1", "1", "Women"),
            raw(2, "geo_a.csv", "1", "1", "Women"),
            raw(3, "geo_a.csv", "1", "1", "Men"),
        ];
        let out = clean(&rows, &CleaningConfig::default()).unwrap();
        let keys: Vec<_> = out
            .records
            .iter()
            .map(|r| (r.geography_code.as_str(), r.sex.as_str()))
            .collect();
        assert_eq!(keys, vec![("geo_a", "Men"), ("geo_a", "Women"), ("geo_b", "Women")]);
    }

    #[test]
    fn pt_br_format_is_honoured() {
        let config = CleaningConfig {
            number_format: NumberFormat::PtBr,
            ..CleaningConfig::default()
        };
        let mut row = raw(1, "geo_a.csv", "12.345,50", "1.000", "Men");
        row.area_km2 = "1.521,11".to_string();
        row.population_density = "7398,26".to_string();
        let out = clean(&[row], &config).unwrap();
        assert_eq!(out.records[0].total_nominal_income, 12345.5);
        assert_eq!(out.records[0].occupied_population, Some(1000));
        assert_eq!(out.records[0].area_km2, Some(1521.11));
    }
}
