//! Layer storage.
//!
//! Each stage owns the tables it writes and replaces them as a unit, so a
//! reader sees either the previous version of a layer or the new one.

pub mod in_memory;
pub mod sqlite;

use crate::domain::{CleanedRecord, RawRecord};
use crate::error::Result;
use crate::pipeline::cleaning::QuarantinedRow;
use crate::pipeline::dimensional::DimensionalModel;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Storage for the raw, cleaned and dimensional layers.
pub trait LayerStore {
    /// Appends raw rows, assigning consecutive row numbers after the current
    /// maximum. Returns the number of rows appended.
    fn append_raw(&self, records: &[RawRecord]) -> Result<usize>;

    /// Full raw snapshot in row-number order.
    fn read_raw(&self) -> Result<Vec<RawRecord>>;

    /// Replaces the cleaned layer and its quarantine in one unit.
    fn replace_cleaned(&self, records: &[CleanedRecord], quarantined: &[QuarantinedRow]) -> Result<()>;

    /// Cleaned layer in canonical `(geography_code, sex, race_or_color)` order.
    fn read_cleaned(&self) -> Result<Vec<CleanedRecord>>;

    fn read_quarantine(&self) -> Result<Vec<QuarantinedRow>>;

    /// Replaces both dimensions, the facts and the rollup in one unit.
    fn replace_dimensional(&self, model: &DimensionalModel) -> Result<()>;

    fn read_dimensional(&self) -> Result<DimensionalModel>;
}
