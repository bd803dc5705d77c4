//! Record destinations.
//!
//! The loader only needs [`RecordSink`]. Readers of imported data (the web
//! service, tests) use [`RecordStore`], which adds collection reads.

mod file;
mod memory;

use std::sync::Arc;

use gtfs_atlas_model::{AgencyKey, NormalizedRecord};
use serde::Serialize;

use crate::SinkError;

pub use file::FileSink;
pub use memory::MemorySink;

pub trait RecordSink: Send + Sync {
    /// Removes every record of `collection` stored under `agency_key` and
    /// returns how many were removed.
    fn delete_where(&self, collection: &str, agency_key: &AgencyKey) -> Result<u64, SinkError>;

    fn insert_many(&self, collection: &str, records: &[NormalizedRecord]) -> Result<(), SinkError>;
}

pub trait RecordStore: RecordSink {
    /// All records of `collection`, in insertion order.
    fn find_all(&self, collection: &str) -> Result<Vec<NormalizedRecord>, SinkError>;

    fn stats(&self, collection: &str) -> Result<CollectionStats, SinkError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStats {
    pub count: u64,
    /// Id of the most recently inserted record still present.
    pub last_inserted_id: Option<String>,
}

impl<T: RecordSink + ?Sized> RecordSink for Arc<T> {
    fn delete_where(&self, collection: &str, agency_key: &AgencyKey) -> Result<u64, SinkError> {
        (**self).delete_where(collection, agency_key)
    }

    fn insert_many(&self, collection: &str, records: &[NormalizedRecord]) -> Result<(), SinkError> {
        (**self).insert_many(collection, records)
    }
}

fn record_belongs_to(record: &NormalizedRecord, agency_key: &AgencyKey) -> bool {
    record.agency_key() == Some(agency_key.as_str())
}
