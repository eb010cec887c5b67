//! Census income layers: raw census rows are cleaned and typed, given a
//! zero-safe average monthly income, and reshaped into a dimensional model.
//! Audits and analytics read the cleaned layer without mutating it.

pub mod analytics;
pub mod audit;
pub mod config;
pub mod domain;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod raw_source;
pub mod storage;

pub use domain::{CleanedRecord, RawRecord};
pub use error::{PipelineError, Result};
pub use pipeline::Pipeline;
pub use storage::{InMemoryStore, LayerStore, SqliteStore};
