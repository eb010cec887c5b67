//! Read-only data-quality checks over the cleaned layer.
//!
//! Nulls in `average_monthly_income` are expected wherever the occupied
//! population is zero; they are tracked against a configured ratio and
//! reported, never raised as errors.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::{info, instrument, warn};

use crate::domain::CleanedRecord;
use crate::observability::metrics;

/// Cleaned-layer columns addressable by audits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    GeographyId,
    GeographyCode,
    SourceFile,
    AreaKm2,
    PopulationDensity,
    TotalNominalIncome,
    OccupiedPopulation,
    AverageMonthlyIncome,
    Sex,
    RaceOrColor,
}

/// The key the cleaning stage guarantees to be unique.
pub const COMPOSITE_KEY: [Column; 3] = [Column::GeographyId, Column::Sex, Column::RaceOrColor];

impl Column {
    pub const ALL: [Column; 10] = [
        Column::GeographyId,
        Column::GeographyCode,
        Column::SourceFile,
        Column::AreaKm2,
        Column::PopulationDensity,
        Column::TotalNominalIncome,
        Column::OccupiedPopulation,
        Column::AverageMonthlyIncome,
        Column::Sex,
        Column::RaceOrColor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Column::GeographyId => "geography_id",
            Column::GeographyCode => "geography_code",
            Column::SourceFile => "source_file",
            Column::AreaKm2 => "area_km2",
            Column::PopulationDensity => "population_density",
            Column::TotalNominalIncome => "total_nominal_income",
            Column::OccupiedPopulation => "occupied_population",
            Column::AverageMonthlyIncome => "average_monthly_income",
            Column::Sex => "sex",
            Column::RaceOrColor => "race_or_color",
        }
    }

    pub fn is_null(&self, record: &CleanedRecord) -> bool {
        match self {
            Column::GeographyId => record.geography_id.is_nil(),
            Column::GeographyCode => record.geography_code.is_empty(),
            Column::SourceFile => record.source_file.is_empty(),
            Column::AreaKm2 => record.area_km2.is_none(),
            Column::PopulationDensity => record.population_density.is_none(),
            Column::TotalNominalIncome => record.total_nominal_income.is_nan(),
            Column::OccupiedPopulation => record.occupied_population.is_none(),
            Column::AverageMonthlyIncome => record.average_monthly_income.is_none(),
            Column::Sex => record.sex.is_empty(),
            Column::RaceOrColor => record.race_or_color.is_empty(),
        }
    }

    /// Text rendering used to compare key values.
    fn render(&self, record: &CleanedRecord) -> String {
        match self {
            Column::GeographyId => record.geography_id.to_string(),
            Column::GeographyCode => record.geography_code.clone(),
            Column::SourceFile => record.source_file.clone(),
            Column::AreaKm2 => format!("{:?}", record.area_km2),
            Column::PopulationDensity => format!("{:?}", record.population_density),
            Column::TotalNominalIncome => format!("{:?}", record.total_nominal_income),
            Column::OccupiedPopulation => format!("{:?}", record.occupied_population),
            Column::AverageMonthlyIncome => format!("{:?}", record.average_monthly_income),
            Column::Sex => record.sex.clone(),
            Column::RaceOrColor => record.race_or_color.clone(),
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Column {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Column::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| format!("unknown column '{s}'"))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub critical_columns: Vec<Column>,
    /// Highest acceptable share of nulls in a critical column.
    pub max_null_ratio: f64,
    /// Per-column overrides of `max_null_ratio`.
    pub column_max_null_ratio: BTreeMap<Column, f64>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            critical_columns: vec![Column::AverageMonthlyIncome, Column::OccupiedPopulation],
            max_null_ratio: 0.5,
            column_max_null_ratio: BTreeMap::new(),
        }
    }
}

impl AuditConfig {
    pub fn threshold_for(&self, column: Column) -> f64 {
        self.column_max_null_ratio
            .get(&column)
            .copied()
            .unwrap_or(self.max_null_ratio)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NullStat {
    pub nulls: usize,
    pub ratio: f64,
    pub max_ratio: f64,
    pub breached: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditReport {
    pub total_rows: usize,
    pub null_stats: BTreeMap<Column, NullStat>,
    /// Composite-key values seen more than once.
    pub duplicate_keys: usize,
}

impl AuditReport {
    pub fn breaches(&self) -> Vec<Column> {
        self.null_stats
            .iter()
            .filter(|(_, stat)| stat.breached)
            .map(|(column, _)| *column)
            .collect()
    }

    pub fn passed(&self) -> bool {
        self.duplicate_keys == 0 && self.null_stats.values().all(|s| !s.breached)
    }
}

/// Count of null values per requested column.
pub fn check_null_counts(records: &[CleanedRecord], columns: &[Column]) -> BTreeMap<Column, usize> {
    columns
        .iter()
        .map(|column| {
            let nulls = records.iter().filter(|r| column.is_null(r)).count();
            (*column, nulls)
        })
        .collect()
}

/// Number of distinct `key` values that occur more than once.
pub fn check_uniqueness(records: &[CleanedRecord], key: &[Column]) -> usize {
    let mut seen: HashMap<Vec<String>, usize> = HashMap::new();
    for record in records {
        let value: Vec<String> = key.iter().map(|c| c.render(record)).collect();
        *seen.entry(value).or_insert(0) += 1;
    }
    seen.values().filter(|&&n| n > 1).count()
}

/// Null-density and composite-key uniqueness audit of the cleaned layer.
#[instrument(skip_all, fields(rows = records.len()))]
pub fn run_audit(records: &[CleanedRecord], config: &AuditConfig) -> AuditReport {
    let total_rows = records.len();
    let null_stats: BTreeMap<Column, NullStat> = check_null_counts(records, &config.critical_columns)
        .into_iter()
        .map(|(column, nulls)| {
            let ratio = if total_rows == 0 {
                0.0
            } else {
                nulls as f64 / total_rows as f64
            };
            let max_ratio = config.threshold_for(column);
            let breached = ratio > max_ratio;
            metrics::audit::null_ratio(column.as_str(), ratio);
            if breached {
                warn!(column = %column, ratio, max_ratio, "Null ratio above threshold");
                metrics::audit::breach(column.as_str());
            }
            (
                column,
                NullStat {
                    nulls,
                    ratio,
                    max_ratio,
                    breached,
                },
            )
        })
        .collect();

    let duplicate_keys = check_uniqueness(records, &COMPOSITE_KEY);
    metrics::audit::duplicate_keys(duplicate_keys);
    if duplicate_keys > 0 {
        warn!(duplicate_keys, "Composite key is not unique in the cleaned layer");
    }

    let report = AuditReport {
        total_rows,
        null_stats,
        duplicate_keys,
    };
    info!(passed = report.passed(), "Audit finished");
    report
}
