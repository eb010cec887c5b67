//! Read-only analytics over the cleaned layer: top-N ranking within a
//! category and the per-geography gender income gap.
//!
//! When a geography contributes several cleaned rows to one group (all
//! race/color values for "Men", say) the group income is
//! `Σ total_nominal_income / Σ occupied_population` over the rows with a
//! positive occupied population. A group without such rows has no income.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::{self, CleanedRecord};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub gender_labels: GenderLabels,
    pub default_top_n: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            gender_labels: GenderLabels::default(),
            default_top_n: 10,
        }
    }
}

/// Values of the `sex` column compared by the gap analysis.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GenderLabels {
    pub male: String,
    pub female: String,
}

impl Default for GenderLabels {
    fn default() -> Self {
        Self {
            male: "Men".to_string(),
            female: "Women".to_string(),
        }
    }
}

/// Which categorical column to filter on, and the value to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryValue {
    Sex(String),
    RaceOrColor(String),
}

impl CategoryValue {
    fn matches(&self, record: &CleanedRecord) -> bool {
        match self {
            CategoryValue::Sex(v) => record.sex == *v,
            CategoryValue::RaceOrColor(v) => record.race_or_color == *v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedGeography {
    pub rank: usize,
    pub geography_id: Uuid,
    pub geography_code: String,
    pub average_monthly_income: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenderGapRow {
    pub geography_id: Uuid,
    pub geography_code: String,
    pub male_income: f64,
    pub female_income: f64,
    pub gap: f64,
    /// `None` when the female income is zero.
    pub ratio: Option<f64>,
}

#[derive(Debug, Default, Clone, Copy)]
struct IncomeAccumulator {
    total_income: f64,
    occupied: i64,
}

impl IncomeAccumulator {
    fn add(&mut self, record: &CleanedRecord) {
        if let Some(n) = record.occupied_population.filter(|n| *n > 0) {
            self.total_income += record.total_nominal_income;
            self.occupied = self.occupied.saturating_add(n);
        }
    }

    fn average(&self) -> Option<f64> {
        domain::average_monthly_income(self.total_income, Some(self.occupied))
    }
}

/// Grouped map `geography_code → (geography_id, group → accumulator)`.
fn group_by_geography<'a, K: Ord>(
    records: impl Iterator<Item = &'a CleanedRecord>,
    group_of: impl Fn(&'a CleanedRecord) -> K,
) -> BTreeMap<&'a str, (Uuid, BTreeMap<K, IncomeAccumulator>)> {
    let mut grouped: BTreeMap<&'a str, (Uuid, BTreeMap<K, IncomeAccumulator>)> = BTreeMap::new();
    for record in records {
        let (_, groups) = grouped
            .entry(record.geography_code.as_str())
            .or_insert_with(|| (record.geography_id, BTreeMap::new()));
        groups.entry(group_of(record)).or_default().add(record);
    }
    grouped
}

/// Top `n` geographies by average monthly income within one category.
///
/// Geographies without an income for the category are left out; ties are
/// broken by geography code ascending.
#[instrument(skip(records))]
pub fn rank_by_category(
    records: &[CleanedRecord],
    category: &CategoryValue,
    n: usize,
) -> Vec<RankedGeography> {
    let grouped = group_by_geography(records.iter().filter(|r| category.matches(r)), |_| ());

    let mut ranked: Vec<(&str, Uuid, f64)> = grouped
        .into_iter()
        .filter_map(|(code, (id, groups))| {
            let income = groups.get(&()).and_then(IncomeAccumulator::average)?;
            Some((code, id, income))
        })
        .collect();
    ranked.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(Ordering::Equal).then_with(|| a.0.cmp(b.0)));

    debug!(candidates = ranked.len(), "Ranking computed");
    ranked
        .into_iter()
        .take(n)
        .enumerate()
        .map(|(i, (code, id, income))| RankedGeography {
            rank: i + 1,
            geography_id: id,
            geography_code: code.to_string(),
            average_monthly_income: income,
        })
        .collect()
}

/// Male-minus-female income gap per geography, largest gap first.
///
/// Only geographies with an income for both labels produce a row.
#[instrument(skip(records))]
pub fn calculate_gender_gap(records: &[CleanedRecord], labels: &GenderLabels) -> Vec<GenderGapRow> {
    let grouped = group_by_geography(records.iter(), |r| r.sex.as_str());

    let mut rows: Vec<GenderGapRow> = grouped
        .into_iter()
        .filter_map(|(code, (id, by_sex))| {
            let male = by_sex.get(labels.male.as_str()).and_then(IncomeAccumulator::average)?;
            let female = by_sex.get(labels.female.as_str()).and_then(IncomeAccumulator::average)?;
            Some(GenderGapRow {
                geography_id: id,
                geography_code: code.to_string(),
                male_income: male,
                female_income: female,
                gap: male - female,
                ratio: domain::safe_divide(male, female),
            })
        })
        .collect();
    rows.sort_by(|a, b| {
        b.gap
            .partial_cmp(&a.gap)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.geography_code.cmp(&b.geography_code))
    });

    debug!(geographies = rows.len(), "Gender gap computed");
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(code: &str, sex: &str, race: &str, income: f64, occupied: Option<i64>) -> CleanedRecord {
        CleanedRecord {
            geography_id: domain::geography_id(code),
            geography_code: code.to_string(),
            source_file: format!("{code}.csv"),
            area_km2: None,
            population_density: None,
            total_nominal_income: income,
            occupied_population: occupied,
            average_monthly_income: domain::average_monthly_income(income, occupied),
            sex: sex.to_string(),
            race_or_color: race.to_string(),
        }
    }

    #[test]
    fn ranks_men_by_income_and_skips_null() {
        let records = vec![
            record("geo_a", "Men", "White", 100.0, Some(1)),
            record("geo_b", "Men", "White", 300.0, Some(1)),
            record("geo_c", "Men", "White", 200.0, Some(1)),
            record("geo_d", "Men", "White", 900.0, Some(0)),
            record("geo_e", "Women", "White", 5000.0, Some(1)),
        ];
        let ranked = rank_by_category(&records, &CategoryValue::Sex("Men".to_string()), 3);
        let incomes: Vec<f64> = ranked.iter().map(|r| r.average_monthly_income).collect();
        assert_eq!(incomes, vec![300.0, 200.0, 100.0]);
        assert_eq!(ranked[0].rank, 1);
        assert!(ranked.iter().all(|r| r.geography_code != "geo_d"));
    }

    #[test]
    fn ties_break_by_geography_code() {
        let records = vec![
            record("geo_z", "Men", "White", 100.0, Some(1)),
            record("geo_m", "Men", "White", 100.0, Some(1)),
            record("geo_a", "Men", "White", 100.0, Some(1)),
        ];
        let ranked = rank_by_category(&records, &CategoryValue::Sex("Men".to_string()), 2);
        let codes: Vec<&str> = ranked.iter().map(|r| r.geography_code.as_str()).collect();
        assert_eq!(codes, vec!["geo_a", "geo_m"]);
    }

    #[test]
    fn ranking_by_race_weights_rows_within_a_geography() {
        let records = vec![
            record("geo_a", "Men", "Black", 3000.0, Some(1)),
            record("geo_a", "Women", "Black", 1000.0, Some(3)),
            record("geo_b", "Men", "White", 9000.0, Some(1)),
        ];
        let ranked = rank_by_category(&records, &CategoryValue::RaceOrColor("Black".to_string()), 5);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].average_monthly_income, 1000.0);
    }

    #[test]
    fn gender_gap_requires_both_sexes() {
        let records = vec![
            record("geo_a", "Men", "White", 2000.0, Some(1)),
            record("geo_a", "Women", "White", 1000.0, Some(1)),
            record("geo_b", "Men", "White", 5000.0, Some(1)),
        ];
        let rows = calculate_gender_gap(&records, &GenderLabels::default());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].geography_code, "geo_a");
        assert_eq!(rows[0].gap, 1000.0);
        assert_eq!(rows[0].ratio, Some(2.0));
    }

    #[test]
    fn gender_gap_ratio_is_undefined_for_zero_female_income() {
        let records = vec![
            record("geo_a", "Men", "White", 2000.0, Some(1)),
            record("geo_a", "Women", "White", 0.0, Some(4)),
        ];
        let rows = calculate_gender_gap(&records, &GenderLabels::default());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].gap, 2000.0);
        assert_eq!(rows[0].ratio, None);
    }

    #[test]
    fn gender_gap_skips_null_income_and_orders_by_gap() {
        let records = vec![
            record("geo_a", "Men", "White", 1500.0, Some(1)),
            record("geo_a", "Women", "White", 1000.0, Some(1)),
            record("geo_b", "Men", "White", 4000.0, Some(1)),
            record("geo_b", "Women", "White", 1000.0, Some(1)),
            record("geo_c", "Men", "White", 4000.0, Some(1)),
            record("geo_c", "Women", "White", 1000.0, Some(0)),
        ];
        let rows = calculate_gender_gap(&records, &GenderLabels::default());
        let codes: Vec<&str> = rows.iter().map(|r| r.geography_code.as_str()).collect();
        assert_eq!(codes, vec!["geo_b", "geo_a"]);
    }

    #[test]
    fn gender_gap_uses_configured_labels() {
        let records = vec![
            record("geo_a", "Homens", "Branca", 3000.0, Some(1)),
            record("geo_a", "Mulheres", "Branca", 2000.0, Some(1)),
        ];
        let labels = GenderLabels {
            male: "Homens".to_string(),
            female: "Mulheres".to_string(),
        };
        assert_eq!(calculate_gender_gap(&records, &labels).len(), 1);
        assert!(calculate_gender_gap(&records, &GenderLabels::default()).is_empty());
    }
}
