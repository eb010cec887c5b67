use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::LayerStore;
use crate::domain::{CleanedRecord, RawRecord};
use crate::error::{PipelineError, Result};
use crate::pipeline::cleaning::QuarantinedRow;
use crate::pipeline::dimensional::DimensionalModel;

#[derive(Debug, Default)]
struct CleanedLayer {
    records: Vec<CleanedRecord>,
    quarantined: Vec<QuarantinedRow>,
}

/// In-memory store for tests and dry runs.
///
/// Layers are held behind `Arc`s; a replacement builds the new layer first
/// and swaps the pointer under the lock.
#[derive(Default)]
pub struct InMemoryStore {
    raw: Mutex<Vec<RawRecord>>,
    cleaned: Mutex<Arc<CleanedLayer>>,
    dimensional: Mutex<Arc<DimensionalModel>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| PipelineError::Store("in-memory store lock poisoned".to_string()))
}

impl LayerStore for InMemoryStore {
    fn append_raw(&self, records: &[RawRecord]) -> Result<usize> {
        let mut raw = lock(&self.raw)?;
        let mut next = raw.last().map_or(1, |r| r.row_number + 1);
        for record in records {
            let mut record = record.clone();
            record.row_number = next;
            next += 1;
            raw.push(record);
        }
        debug!(appended = records.len(), total = raw.len(), "Appended raw rows");
        Ok(records.len())
    }

    fn read_raw(&self) -> Result<Vec<RawRecord>> {
        Ok(lock(&self.raw)?.clone())
    }

    fn replace_cleaned(&self, records: &[CleanedRecord], quarantined: &[QuarantinedRow]) -> Result<()> {
        let mut ordered = records.to_vec();
        ordered.sort_by(|a, b| a.key().cmp(&b.key()));
        let layer = Arc::new(CleanedLayer {
            records: ordered,
            quarantined: quarantined.to_vec(),
        });
        *lock(&self.cleaned)? = layer;
        Ok(())
    }

    fn read_cleaned(&self) -> Result<Vec<CleanedRecord>> {
        let layer = Arc::clone(&*lock(&self.cleaned)?);
        Ok(layer.records.clone())
    }

    fn read_quarantine(&self) -> Result<Vec<QuarantinedRow>> {
        let layer = Arc::clone(&*lock(&self.cleaned)?);
        Ok(layer.quarantined.clone())
    }

    fn replace_dimensional(&self, model: &DimensionalModel) -> Result<()> {
        let model = Arc::new(model.clone());
        *lock(&self.dimensional)? = model;
        Ok(())
    }

    fn read_dimensional(&self) -> Result<DimensionalModel> {
        let model = Arc::clone(&*lock(&self.dimensional)?);
        Ok((*model).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assigns_consecutive_row_numbers() {
        let store = InMemoryStore::new();
        let row = RawRecord {
            row_number: 99,
            source_file: "a.csv".to_string(),
            ..RawRecord::default()
        };
        store.append_raw(&[row.clone(), row.clone()]).unwrap();
        store.append_raw(&[row]).unwrap();
        let numbers: Vec<u64> = store.read_raw().unwrap().iter().map(|r| r.row_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn empty_store_reads_empty_layers() {
        let store = InMemoryStore::new();
        assert!(store.read_cleaned().unwrap().is_empty());
        assert!(store.read_quarantine().unwrap().is_empty());
        assert_eq!(store.read_dimensional().unwrap(), DimensionalModel::default());
    }
}
