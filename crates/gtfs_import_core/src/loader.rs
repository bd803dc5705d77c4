use gtfs_atlas_model::{AgencyKey, NormalizedRecord};
use serde::Serialize;
use tracing::debug;

use crate::sink::RecordSink;
use crate::{ImportError, LoadError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub deleted: u64,
    pub inserted: u64,
    pub batches: usize,
}

/// Replaces one agency's partition of a collection with a record stream.
///
/// Not transactional: if an insert fails, the delete and earlier batches stay
/// applied.
pub struct BatchedLoader<'a> {
    sink: &'a dyn RecordSink,
    batch_size: usize,
}

impl<'a> BatchedLoader<'a> {
    pub fn new(sink: &'a dyn RecordSink, batch_size: usize) -> Self {
        Self {
            sink,
            batch_size: batch_size.max(1),
        }
    }

    pub fn load<I, E>(
        &self,
        collection: &str,
        agency_key: &AgencyKey,
        records: I,
    ) -> Result<LoadSummary, ImportError>
    where
        I: IntoIterator<Item = Result<NormalizedRecord, E>>,
        E: Into<ImportError>,
    {
        let deleted = self
            .sink
            .delete_where(collection, agency_key)
            .map_err(|source| LoadError::Delete {
                collection: collection.to_string(),
                agency_key: agency_key.to_string(),
                source,
            })?;

        let mut summary = LoadSummary {
            deleted,
            ..LoadSummary::default()
        };
        let mut batch = Vec::with_capacity(self.batch_size);
        for record in records {
            batch.push(record.map_err(Into::<ImportError>::into)?);
            if batch.len() >= self.batch_size {
                self.flush(collection, &mut batch, &mut summary)?;
            }
        }
        if !batch.is_empty() {
            self.flush(collection, &mut batch, &mut summary)?;
        }
        Ok(summary)
    }

    fn flush(
        &self,
        collection: &str,
        batch: &mut Vec<NormalizedRecord>,
        summary: &mut LoadSummary,
    ) -> Result<(), LoadError> {
        self.sink
            .insert_many(collection, batch)
            .map_err(|source| LoadError::Insert {
                collection: collection.to_string(),
                batch: summary.batches + 1,
                source,
            })?;
        summary.batches += 1;
        summary.inserted += batch.len() as u64;
        debug!("Inserted batch {} into {} ({} records)", summary.batches, collection, batch.len());
        batch.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ParseError, SinkError};
    use gtfs_atlas_model::FieldValue;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<String>>,
        fail_on_insert: Option<usize>,
    }

    impl RecordSink for RecordingSink {
        fn delete_where(&self, collection: &str, agency_key: &AgencyKey) -> Result<u64, SinkError> {
            self.calls
                .lock()
                .expect("lock")
                .push(format!("delete {} {}", collection, agency_key));
            Ok(7)
        }

        fn insert_many(
            &self,
            collection: &str,
            records: &[NormalizedRecord],
        ) -> Result<(), SinkError> {
            let mut calls = self.calls.lock().expect("lock");
            let inserts = calls.iter().filter(|c| c.starts_with("insert")).count();
            if self.fail_on_insert == Some(inserts + 1) {
                return Err(SinkError::Backend("disk full".to_string()));
            }
            calls.push(format!("insert {} {}", collection, records.len()));
            Ok(())
        }
    }

    fn records(count: usize) -> Vec<Result<NormalizedRecord, ImportError>> {
        (0..count)
            .map(|index| {
                let mut fields = BTreeMap::new();
                fields.insert("stop_id".to_string(), FieldValue::Integer(index as i64));
                Ok(NormalizedRecord::from_fields(fields))
            })
            .collect()
    }

    fn key() -> AgencyKey {
        AgencyKey::new("metro").expect("key")
    }

    #[test]
    fn loads_in_batches_with_a_final_partial_flush() {
        let sink = RecordingSink::default();
        let summary = BatchedLoader::new(&sink, 1000)
            .load("stops", &key(), records(2500))
            .expect("load");

        assert_eq!(
            *sink.calls.lock().expect("lock"),
            vec![
                "delete stops metro",
                "insert stops 1000",
                "insert stops 1000",
                "insert stops 500"
            ]
        );
        assert_eq!(
            summary,
            LoadSummary {
                deleted: 7,
                inserted: 2500,
                batches: 3
            }
        );
    }

    #[test]
    fn empty_stream_still_clears_the_partition() {
        let sink = RecordingSink::default();
        let summary = BatchedLoader::new(&sink, 1000)
            .load("stops", &key(), records(0))
            .expect("load");
        assert_eq!(summary.batches, 0);
        assert_eq!(*sink.calls.lock().expect("lock"), vec!["delete stops metro"]);
    }

    #[test]
    fn failed_insert_stops_remaining_batches() {
        let sink = RecordingSink {
            fail_on_insert: Some(2),
            ..RecordingSink::default()
        };
        let err = BatchedLoader::new(&sink, 10)
            .load("trips", &key(), records(35))
            .expect_err("insert failure");

        assert!(matches!(
            err,
            ImportError::Load(LoadError::Insert { batch: 2, .. })
        ));
        assert_eq!(sink.calls.lock().expect("lock").len(), 2);
    }

    #[test]
    fn stream_error_aborts_after_sent_batches() {
        let sink = RecordingSink::default();
        let mut stream = records(15);
        stream.push(Err(ImportError::Parse {
            file: "stops.txt".to_string(),
            source: ParseError::Open {
                path: "stops.txt".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "gone"),
            },
        }));
        stream.extend(records(5));

        let err = BatchedLoader::new(&sink, 10)
            .load("stops", &key(), stream)
            .expect_err("parse failure");
        assert!(matches!(err, ImportError::Parse { .. }));
        assert_eq!(
            *sink.calls.lock().expect("lock"),
            vec!["delete stops metro", "insert stops 10"]
        );
    }
}
