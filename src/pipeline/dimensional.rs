//! Dimensional modeling stage: category and geography dimensions, the
//! indicator fact table, and a per-geography rollup built from the facts.

use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{self, CleanedRecord};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDim {
    pub category_id: Uuid,
    pub sex: String,
    pub race_or_color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeographyDim {
    pub geography_id: Uuid,
    pub geography_code: String,
    pub source_file: String,
    pub area_km2: Option<f64>,
    pub population_density: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorFact {
    pub geography_id: Uuid,
    pub category_id: Uuid,
    pub total_nominal_income: f64,
    pub occupied_population: Option<i64>,
    pub average_monthly_income: Option<f64>,
}

/// Coarser grain: one row per geography, summed over categories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeographyRollup {
    pub geography_id: Uuid,
    pub category_count: usize,
    pub total_nominal_income: f64,
    pub occupied_population: Option<i64>,
    pub average_monthly_income: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionalModel {
    pub categories: Vec<CategoryDim>,
    pub geographies: Vec<GeographyDim>,
    pub facts: Vec<IndicatorFact>,
    pub geography_rollups: Vec<GeographyRollup>,
}

/// Builds the whole dimensional model from the cleaned layer.
///
/// Dimensions are extracted first; every fact then resolves its keys by
/// lookup, and a miss aborts the build.
#[instrument(skip_all, fields(cleaned_rows = cleaned.len()))]
pub fn build_model(cleaned: &[CleanedRecord]) -> Result<DimensionalModel> {
    let categories = extract_categories(cleaned);
    let geographies = extract_geographies(cleaned);

    let category_index: HashMap<(&str, &str), Uuid> = categories
        .iter()
        .map(|c| ((c.sex.as_str(), c.race_or_color.as_str()), c.category_id))
        .collect();
    let geography_index: HashMap<&str, Uuid> = geographies
        .iter()
        .map(|g| (g.geography_code.as_str(), g.geography_id))
        .collect();

    let facts = build_facts(cleaned, &category_index, &geography_index)?;
    let geography_rollups = rollup_by_geography(&facts);
    if let Some(rollup) = geography_rollups
        .iter()
        .find(|r| !r.total_nominal_income.is_finite())
    {
        let geography_code = geographies
            .iter()
            .find(|g| g.geography_id == rollup.geography_id)
            .map_or_else(|| rollup.geography_id.to_string(), |g| g.geography_code.clone());
        return Err(PipelineError::NonFiniteTotal { geography_code });
    }

    let model = DimensionalModel {
        categories,
        geographies,
        facts,
        geography_rollups,
    };
    verify_referential_integrity(&model)?;

    info!(
        categories = model.categories.len(),
        geographies = model.geographies.len(),
        facts = model.facts.len(),
        "Dimensional model built"
    );
    Ok(model)
}

fn extract_categories(cleaned: &[CleanedRecord]) -> Vec<CategoryDim> {
    let distinct: BTreeSet<(&str, &str)> = cleaned
        .iter()
        .map(|r| (r.sex.as_str(), r.race_or_color.as_str()))
        .collect();
    distinct
        .into_iter()
        .map(|(sex, race_or_color)| CategoryDim {
            category_id: domain::category_id(sex, race_or_color),
            sex: sex.to_string(),
            race_or_color: race_or_color.to_string(),
        })
        .collect()
}

fn extract_geographies(cleaned: &[CleanedRecord]) -> Vec<GeographyDim> {
    let mut ordered: Vec<&CleanedRecord> = cleaned.iter().collect();
    ordered.sort_by(|a, b| a.key().cmp(&b.key()));

    let mut by_code: BTreeMap<&str, GeographyDim> = BTreeMap::new();
    for record in ordered {
        match by_code.entry(record.geography_code.as_str()) {
            Entry::Occupied(slot) => {
                let existing = slot.get();
                if existing.area_km2 != record.area_km2
                    || existing.population_density != record.population_density
                {
                    warn!(
                        geography = %record.geography_code,
                        sex = %record.sex,
                        race_or_color = %record.race_or_color,
                        "Geography attributes differ between cleaned rows; keeping the first"
                    );
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(GeographyDim {
                    geography_id: record.geography_id,
                    geography_code: record.geography_code.clone(),
                    source_file: record.source_file.clone(),
                    area_km2: record.area_km2,
                    population_density: record.population_density,
                });
            }
        }
    }
    by_code.into_values().collect()
}

fn build_facts(
    cleaned: &[CleanedRecord],
    category_index: &HashMap<(&str, &str), Uuid>,
    geography_index: &HashMap<&str, Uuid>,
) -> Result<Vec<IndicatorFact>> {
    let mut ordered: Vec<&CleanedRecord> = cleaned.iter().collect();
    ordered.sort_by(|a, b| a.key().cmp(&b.key()));

    ordered
        .into_iter()
        .map(|record| -> Result<IndicatorFact> {
            let category_id = category_index
                .get(&(record.sex.as_str(), record.race_or_color.as_str()))
                .copied()
                .ok_or_else(|| PipelineError::UnresolvedDimension {
                    dimension: "category",
                    geography_code: record.geography_code.clone(),
                })?;
            let geography_id = geography_index
                .get(record.geography_code.as_str())
                .copied()
                .ok_or_else(|| PipelineError::UnresolvedDimension {
                    dimension: "geography",
                    geography_code: record.geography_code.clone(),
                })?;
            Ok(IndicatorFact {
                geography_id,
                category_id,
                total_nominal_income: record.total_nominal_income,
                occupied_population: record.occupied_population,
                average_monthly_income: record.average_monthly_income,
            })
        })
        .collect()
}

/// Sums facts per geography and re-derives the average with the same
/// zero-population rule as the cleaning stage. Output is ordered by the
/// order in which geographies first appear in `facts`.
pub fn rollup_by_geography(facts: &[IndicatorFact]) -> Vec<GeographyRollup> {
    let mut order: Vec<Uuid> = Vec::new();
    let mut totals: HashMap<Uuid, GeographyRollup> = HashMap::new();

    for fact in facts {
        let entry = totals.entry(fact.geography_id).or_insert_with(|| {
            order.push(fact.geography_id);
            GeographyRollup {
                geography_id: fact.geography_id,
                category_count: 0,
                total_nominal_income: 0.0,
                occupied_population: None,
                average_monthly_income: None,
            }
        });
        entry.category_count += 1;
        entry.total_nominal_income += fact.total_nominal_income;
        if let Some(n) = fact.occupied_population {
            entry.occupied_population = Some(entry.occupied_population.unwrap_or(0).saturating_add(n));
        }
    }

    order
        .into_iter()
        .filter_map(|id| totals.remove(&id))
        .map(|mut rollup| {
            rollup.average_monthly_income =
                domain::average_monthly_income(rollup.total_nominal_income, rollup.occupied_population);
            rollup
        })
        .collect()
}

/// Every fact and rollup key must resolve to exactly one dimension row.
pub fn verify_referential_integrity(model: &DimensionalModel) -> Result<()> {
    let mut category_ids = HashSet::new();
    for category in &model.categories {
        if !category_ids.insert(category.category_id) {
            return Err(PipelineError::ReferentialIntegrity(format!(
                "category {} appears more than once",
                category.category_id
            )));
        }
    }
    let mut geography_ids = HashSet::new();
    for geography in &model.geographies {
        if !geography_ids.insert(geography.geography_id) {
            return Err(PipelineError::ReferentialIntegrity(format!(
                "geography {} appears more than once",
                geography.geography_code
            )));
        }
    }

    for fact in &model.facts {
        if !category_ids.contains(&fact.category_id) {
            return Err(PipelineError::ReferentialIntegrity(format!(
                "fact references unknown category {}",
                fact.category_id
            )));
        }
        if !geography_ids.contains(&fact.geography_id) {
            return Err(PipelineError::ReferentialIntegrity(format!(
                "fact references unknown geography {}",
                fact.geography_id
            )));
        }
    }
    for rollup in &model.geography_rollups {
        if !geography_ids.contains(&rollup.geography_id) {
            return Err(PipelineError::ReferentialIntegrity(format!(
                "rollup references unknown geography {}",
                rollup.geography_id
            )));
        }
    }
    Ok(())
}
