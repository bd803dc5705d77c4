use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use gtfs_atlas_model::{AgencyKey, NormalizedRecord};
use rustc_hash::FxHashMap;

use super::{record_belongs_to, CollectionStats, RecordSink, RecordStore};
use crate::SinkError;

#[derive(Debug, Default)]
struct Collection {
    next_id: u64,
    rows: Vec<(u64, NormalizedRecord)>,
}

/// Process-local store. Ids are assigned per collection and never reused.
#[derive(Debug, Default)]
pub struct MemorySink {
    collections: RwLock<FxHashMap<String, Collection>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in `collection` stored under `agency_key`.
    pub fn count(&self, collection: &str, agency_key: &AgencyKey) -> Result<u64, SinkError> {
        let collections = self.read()?;
        Ok(collections
            .get(collection)
            .map(|c| {
                c.rows
                    .iter()
                    .filter(|(_, record)| record_belongs_to(record, agency_key))
                    .count() as u64
            })
            .unwrap_or(0))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, FxHashMap<String, Collection>>, SinkError> {
        self.collections
            .read()
            .map_err(|_| SinkError::Backend("memory sink lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, FxHashMap<String, Collection>>, SinkError> {
        self.collections
            .write()
            .map_err(|_| SinkError::Backend("memory sink lock poisoned".to_string()))
    }
}

impl RecordSink for MemorySink {
    fn delete_where(&self, collection: &str, agency_key: &AgencyKey) -> Result<u64, SinkError> {
        let mut collections = self.write()?;
        let Some(entry) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = entry.rows.len();
        entry
            .rows
            .retain(|(_, record)| !record_belongs_to(record, agency_key));
        Ok((before - entry.rows.len()) as u64)
    }

    fn insert_many(&self, collection: &str, records: &[NormalizedRecord]) -> Result<(), SinkError> {
        let mut collections = self.write()?;
        let entry = collections.entry(collection.to_string()).or_default();
        entry.rows.reserve(records.len());
        for record in records {
            entry.next_id += 1;
            entry.rows.push((entry.next_id, record.clone()));
        }
        Ok(())
    }
}

impl RecordStore for MemorySink {
    fn find_all(&self, collection: &str) -> Result<Vec<NormalizedRecord>, SinkError> {
        let collections = self.read()?;
        Ok(collections
            .get(collection)
            .map(|c| c.rows.iter().map(|(_, record)| record.clone()).collect())
            .unwrap_or_default())
    }

    fn stats(&self, collection: &str) -> Result<CollectionStats, SinkError> {
        let collections = self.read()?;
        let Some(entry) = collections.get(collection) else {
            return Ok(CollectionStats::default());
        };
        Ok(CollectionStats {
            count: entry.rows.len() as u64,
            last_inserted_id: entry.rows.last().map(|(id, _)| id.to_string()),
        })
    }
}
