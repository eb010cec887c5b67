//! Metrics for the census pipeline.
//!
//! Recording goes through the `metrics` facade; `init` installs a Prometheus
//! recorder whose rendered snapshot can be written to disk after a run.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::fmt;
use std::path::Path;
use tracing::info;

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// All metric names used in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    RawRowsRead,
    CleanedRowsWritten,
    RowsQuarantined,
    DuplicatesResolved,
    CategoriesWritten,
    GeographiesWritten,
    FactsWritten,
    StageDuration,
    AuditNullRatio,
    AuditBreaches,
    AuditDuplicateKeys,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::RawRowsRead => "census_raw_rows_read_total",
            MetricName::CleanedRowsWritten => "census_cleaned_rows_written_total",
            MetricName::RowsQuarantined => "census_rows_quarantined_total",
            MetricName::DuplicatesResolved => "census_duplicates_resolved_total",
            MetricName::CategoriesWritten => "census_categories_written_total",
            MetricName::GeographiesWritten => "census_geographies_written_total",
            MetricName::FactsWritten => "census_facts_written_total",
            MetricName::StageDuration => "census_stage_duration_seconds",
            MetricName::AuditNullRatio => "census_audit_null_ratio",
            MetricName::AuditBreaches => "census_audit_breaches_total",
            MetricName::AuditDuplicateKeys => "census_audit_duplicate_keys",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Installs the Prometheus recorder. Calling it twice is a no-op.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;
    METRICS_HANDLE.set(handle).ok();
    info!("Metrics recorder installed");
    Ok(())
}

/// Prometheus text exposition of everything recorded so far.
pub fn render() -> Option<String> {
    METRICS_HANDLE.get().map(|h| h.render())
}

/// Writes the current snapshot to `path` (textfile-collector format).
pub fn write_snapshot(path: &Path) -> std::io::Result<()> {
    let body = render().unwrap_or_default();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, body)
}

pub mod cleaning {
    use super::MetricName;

    pub fn raw_rows_read(count: usize) {
        ::metrics::counter!(MetricName::RawRowsRead.as_str()).increment(count as u64);
    }

    pub fn rows_cleaned(count: usize) {
        ::metrics::counter!(MetricName::CleanedRowsWritten.as_str()).increment(count as u64);
    }

    pub fn row_quarantined(reason: &'static str) {
        ::metrics::counter!(MetricName::RowsQuarantined.as_str(), "reason" => reason).increment(1);
    }

    pub fn duplicate_resolved() {
        ::metrics::counter!(MetricName::DuplicatesResolved.as_str()).increment(1);
    }
}

pub mod modeling {
    use super::MetricName;

    pub fn model_written(categories: usize, geographies: usize, facts: usize) {
        ::metrics::counter!(MetricName::CategoriesWritten.as_str()).increment(categories as u64);
        ::metrics::counter!(MetricName::GeographiesWritten.as_str()).increment(geographies as u64);
        ::metrics::counter!(MetricName::FactsWritten.as_str()).increment(facts as u64);
    }
}

pub mod pipeline {
    use super::MetricName;

    pub fn stage_duration(stage: &'static str, seconds: f64) {
        ::metrics::histogram!(MetricName::StageDuration.as_str(), "stage" => stage).record(seconds);
    }
}

pub mod audit {
    use super::MetricName;

    pub fn null_ratio(column: &'static str, ratio: f64) {
        ::metrics::gauge!(MetricName::AuditNullRatio.as_str(), "column" => column).set(ratio);
    }

    pub fn breach(column: &'static str) {
        ::metrics::counter!(MetricName::AuditBreaches.as_str(), "column" => column).increment(1);
    }

    pub fn duplicate_keys(count: usize) {
        ::metrics::gauge!(MetricName::AuditDuplicateKeys.as_str()).set(count as f64);
    }
}
