// Layered transformation pipeline: raw -> cleaned -> dimensional

pub mod cleaning;
pub mod dimensional;
pub mod fingerprint;
pub mod numeric;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, instrument};

use crate::error::Result;
use crate::observability::metrics;
use crate::storage::LayerStore;
use cleaning::CleaningConfig;

#[derive(Debug, Clone, Serialize)]
pub struct CleanStageReport {
    pub raw_rows: usize,
    pub cleaned_rows: usize,
    pub quarantined: usize,
    pub quarantined_by_reason: BTreeMap<String, usize>,
    pub duplicates_resolved: usize,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelStageReport {
    pub categories: usize,
    pub geographies: usize,
    pub facts: usize,
    pub geography_rollups: usize,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub clean: CleanStageReport,
    pub model: ModelStageReport,
}

/// Runs the stages against a store. Each stage reads its input layer from
/// the store and replaces its output layer as one unit.
pub struct Pipeline<'a> {
    store: &'a dyn LayerStore,
    config: &'a CleaningConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(store: &'a dyn LayerStore, config: &'a CleaningConfig) -> Self {
        Self { store, config }
    }

    /// Rebuilds the cleaned layer from the full raw snapshot.
    #[instrument(skip(self))]
    pub fn clean_stage(&self) -> Result<CleanStageReport> {
        let started = Instant::now();
        let raw = self.store.read_raw()?;
        metrics::cleaning::raw_rows_read(raw.len());

        let outcome = cleaning::clean(&raw, self.config)?;
        let fingerprint = fingerprint::fingerprint(&outcome.records)?;
        self.store
            .replace_cleaned(&outcome.records, &outcome.quarantined)?;

        let mut quarantined_by_reason = BTreeMap::new();
        for q in &outcome.quarantined {
            *quarantined_by_reason.entry(q.reason.kind().to_string()).or_insert(0) += 1;
        }
        metrics::pipeline::stage_duration("clean", started.elapsed().as_secs_f64());
        info!(
            raw = raw.len(),
            cleaned = outcome.records.len(),
            quarantined = outcome.quarantined.len(),
            "Cleaned layer replaced"
        );

        Ok(CleanStageReport {
            raw_rows: raw.len(),
            cleaned_rows: outcome.records.len(),
            quarantined: outcome.quarantined.len(),
            quarantined_by_reason,
            duplicates_resolved: outcome.duplicates_resolved,
            fingerprint,
        })
    }

    /// Rebuilds dimensions, facts and rollups from the stored cleaned layer.
    #[instrument(skip(self))]
    pub fn model_stage(&self) -> Result<ModelStageReport> {
        let started = Instant::now();
        let cleaned = self.store.read_cleaned()?;
        let model = dimensional::build_model(&cleaned)?;
        let fingerprint = fingerprint::fingerprint(&model)?;
        self.store.replace_dimensional(&model)?;

        metrics::modeling::model_written(
            model.categories.len(),
            model.geographies.len(),
            model.facts.len(),
        );
        metrics::pipeline::stage_duration("model", started.elapsed().as_secs_f64());
        info!(facts = model.facts.len(), "Dimensional layer replaced");

        Ok(ModelStageReport {
            categories: model.categories.len(),
            geographies: model.geographies.len(),
            facts: model.facts.len(),
            geography_rollups: model.geography_rollups.len(),
            fingerprint,
        })
    }

    /// Clean, then model. A failing clean stage leaves both layers untouched.
    pub fn run(&self) -> Result<PipelineReport> {
        let started_at = Utc::now();
        let clean = self.clean_stage()?;
        let model = self.model_stage()?;
        Ok(PipelineReport {
            started_at,
            finished_at: Utc::now(),
            clean,
            model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawRecord;
    use crate::error::PipelineError;
    use crate::storage::InMemoryStore;

    fn raw(source: &str, income: &str, occupied: &str, sex: &str) -> RawRecord {
        RawRecord {
            source_file: source.to_string(),
            area_km2: "100".to_string(),
            population_density: "25.5".to_string(),
            total_nominal_income: income.to_string(),
            occupied_population: occupied.to_string(),
            sex: sex.to_string(),
            race_or_color: "White".to_string(),
            ..RawRecord::default()
        }
    }

    #[test]
    fn run_fills_both_layers() {
        let store = InMemoryStore::new();
        store
            .append_raw(&[
                raw("geo_a.csv", "2000", "1", "Men"),
                raw("geo_a.csv", "1000", "1", "Women"),
                raw("geo_b.csv", "oops", "1", "Men"),
            ])
            .unwrap();
        let config = CleaningConfig::default();
        let report = Pipeline::new(&store, &config).run().unwrap();

        assert_eq!(report.clean.raw_rows, 3);
        assert_eq!(report.clean.cleaned_rows, 2);
        assert_eq!(report.clean.quarantined_by_reason.get("unparsable"), Some(&1));
        assert_eq!(report.model.facts, 2);
        assert_eq!(report.model.geographies, 1);
        assert_eq!(store.read_quarantine().unwrap()[0].row_number, 3);
    }

    #[test]
    fn rejected_duplicates_leave_previous_layers_in_place() {
        let store = InMemoryStore::new();
        store.append_raw(&[raw("geo_a.csv", "2000", "1", "Men")]).unwrap();
        let config = CleaningConfig::default();
        let pipeline = Pipeline::new(&store, &config);
        pipeline.run().unwrap();
        let before_cleaned = store.read_cleaned().unwrap();
        let before_model = store.read_dimensional().unwrap();

        store.append_raw(&[raw("geo_a.csv", "9999", "1", "Men")]).unwrap();
        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateKey { first_row: 1, duplicate_row: 2, .. }));

        assert_eq!(store.read_cleaned().unwrap(), before_cleaned);
        assert_eq!(store.read_dimensional().unwrap(), before_model);
    }
}
