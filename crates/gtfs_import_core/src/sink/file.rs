use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use gtfs_atlas_model::{AgencyKey, NormalizedRecord};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{CollectionStats, RecordSink, RecordStore};
use crate::SinkError;

const PARTITION_EXTENSION: &str = "ndjson";
const SEQUENCE_FILE: &str = ".sequence";
const UNKEYED_PARTITION: &str = "%unkeyed";

#[derive(Serialize)]
struct StoredLineRef<'a> {
    id: u64,
    record: &'a NormalizedRecord,
}

#[derive(Deserialize)]
struct StoredLine {
    id: u64,
    record: NormalizedRecord,
}

/// Directory-backed store: `<root>/<collection>/<agency_key>.ndjson`, one
/// `{"id": n, "record": {...}}` object per line.
///
/// Writes are serialized within one process. Ids come from a per-collection
/// `.sequence` file.
#[derive(Debug)]
pub struct FileSink {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSink {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| SinkError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        self.root.join(escape_component(collection))
    }

    fn partition_path(&self, collection: &str, agency_key: Option<&str>) -> PathBuf {
        let stem = agency_key
            .map(escape_component)
            .unwrap_or_else(|| UNKEYED_PARTITION.to_string());
        self.collection_dir(collection)
            .join(format!("{}.{}", stem, PARTITION_EXTENSION))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>, SinkError> {
        self.write_lock
            .lock()
            .map_err(|_| SinkError::Backend("file sink lock poisoned".to_string()))
    }

    fn partitions(&self, collection: &str) -> Result<Vec<PathBuf>, SinkError> {
        let dir = self.collection_dir(collection);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(SinkError::Io { path: dir, source }),
        };
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| SinkError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(PARTITION_EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn read_partition(path: &Path) -> Result<Vec<StoredLine>, SinkError> {
        let file = File::open(path).map_err(|source| SinkError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut lines = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| SinkError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let stored = serde_json::from_str(&line).map_err(|source| SinkError::Corrupt {
                path: path.to_path_buf(),
                line: index + 1,
                source,
            })?;
            lines.push(stored);
        }
        Ok(lines)
    }

    fn read_collection(&self, collection: &str) -> Result<Vec<StoredLine>, SinkError> {
        let mut all = Vec::new();
        for path in self.partitions(collection)? {
            all.extend(Self::read_partition(&path)?);
        }
        all.sort_by_key(|line| line.id);
        Ok(all)
    }

    /// Last id handed out in `collection`. A missing or unreadable sequence
    /// file is rebuilt from the highest stored id so ids are never reused.
    fn last_sequence(&self, collection: &str, path: &Path) -> Result<u64, SinkError> {
        match fs::read_to_string(path) {
            Ok(text) => match text.trim().parse() {
                Ok(id) => Ok(id),
                Err(_) => {
                    warn!(
                        "Unreadable sequence file {}, rebuilding from stored ids",
                        path.display()
                    );
                    self.highest_stored_id(collection)
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                self.highest_stored_id(collection)
            }
            Err(source) => Err(SinkError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn highest_stored_id(&self, collection: &str) -> Result<u64, SinkError> {
        Ok(self
            .read_collection(collection)?
            .last()
            .map_or(0, |line| line.id))
    }
}

impl RecordSink for FileSink {
    fn delete_where(&self, collection: &str, agency_key: &AgencyKey) -> Result<u64, SinkError> {
        let _guard = self.lock()?;
        let path = self.partition_path(collection, Some(agency_key.as_str()));
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => return Err(SinkError::Io { path, source }),
        };
        let mut removed = 0u64;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|source| SinkError::Io {
                path: path.clone(),
                source,
            })?;
            if !line.trim().is_empty() {
                removed += 1;
            }
        }
        fs::remove_file(&path).map_err(|source| SinkError::Io { path, source })?;
        Ok(removed)
    }

    fn insert_many(&self, collection: &str, records: &[NormalizedRecord]) -> Result<(), SinkError> {
        if records.is_empty() {
            return Ok(());
        }
        let _guard = self.lock()?;
        let dir = self.collection_dir(collection);
        fs::create_dir_all(&dir).map_err(|source| SinkError::Io {
            path: dir.clone(),
            source,
        })?;
        let sequence_path = dir.join(SEQUENCE_FILE);
        let mut next_id = self.last_sequence(collection, &sequence_path)?;

        let mut by_partition: FxHashMap<PathBuf, Vec<u8>> = FxHashMap::default();
        for record in records {
            next_id += 1;
            let path = self.partition_path(collection, record.agency_key());
            let buffer = by_partition.entry(path).or_default();
            serde_json::to_writer(
                &mut *buffer,
                &StoredLineRef {
                    id: next_id,
                    record,
                },
            )?;
            buffer.push(b'\n');
        }

        for (path, bytes) in by_partition {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|source| SinkError::Io {
                    path: path.clone(),
                    source,
                })?;
            let mut writer = BufWriter::new(file);
            writer
                .write_all(&bytes)
                .and_then(|_| writer.flush())
                .map_err(|source| SinkError::Io { path, source })?;
        }

        fs::write(&sequence_path, next_id.to_string()).map_err(|source| SinkError::Io {
            path: sequence_path,
            source,
        })
    }
}

impl RecordStore for FileSink {
    fn find_all(&self, collection: &str) -> Result<Vec<NormalizedRecord>, SinkError> {
        Ok(self
            .read_collection(collection)?
            .into_iter()
            .map(|line| line.record)
            .collect())
    }

    fn stats(&self, collection: &str) -> Result<CollectionStats, SinkError> {
        let lines = self.read_collection(collection)?;
        Ok(CollectionStats {
            count: lines.len() as u64,
            last_inserted_id: lines.last().map(|line| line.id.to_string()),
        })
    }
}

/// Makes `value` usable as a single path component. Bytes outside
/// `[A-Za-z0-9_-]` become `%XX`, so distinct names stay distinct.
fn escape_component(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("%{:02X}", byte));
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use gtfs_atlas_model::FieldValue;
    use std::collections::BTreeMap;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        std::env::temp_dir().join(format!("{}_{}_{}", prefix, std::process::id(), nanos))
    }

    fn record(agency: &str, stop_id: &str, lat: f64) -> NormalizedRecord {
        let mut fields = BTreeMap::new();
        fields.insert("agency_key".to_string(), FieldValue::from(agency));
        fields.insert("stop_id".to_string(), FieldValue::from(stop_id));
        fields.insert("stop_lat".to_string(), FieldValue::Float(lat));
        NormalizedRecord::from_fields(fields)
    }

    #[test]
    fn writes_one_partition_per_agency() {
        let dir = temp_dir("gtfs_file_sink");
        let sink = FileSink::open(&dir).expect("open");
        sink.insert_many("stops", &[record("metro", "1", 1.5), record("bus/line", "2", 2.5)])
            .expect("insert");

        assert!(dir.join("stops").join("metro.ndjson").is_file());
        assert!(dir.join("stops").join("bus%2Fline.ndjson").is_file());
        let first = fs::read_to_string(dir.join("stops").join("metro.ndjson")).expect("read");
        assert!(first.starts_with("{\"id\":1,\"record\":{"));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn delete_removes_only_the_partition_and_reports_count() {
        let dir = temp_dir("gtfs_file_sink_delete");
        let sink = FileSink::open(&dir).expect("open");
        sink.insert_many(
            "stops",
            &[record("a", "1", 1.0), record("a", "2", 2.0), record("b", "3", 3.0)],
        )
        .expect("insert");

        let a = AgencyKey::new("a").expect("key");
        assert_eq!(sink.delete_where("stops", &a).expect("delete"), 2);
        assert_eq!(sink.delete_where("stops", &a).expect("delete"), 0);
        let remaining = sink.find_all("stops").expect("find");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].get_str("stop_id"), Some("3"));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn records_round_trip_with_types_and_sequence_survives_reopen() {
        let dir = temp_dir("gtfs_file_sink_reopen");
        {
            let sink = FileSink::open(&dir).expect("open");
            sink.insert_many("stops", &[record("a", "1", 40.25)]).expect("insert");
        }
        let sink = FileSink::open(&dir).expect("reopen");
        sink.insert_many("stops", &[record("a", "2", 41.0)]).expect("insert");

        let records = sink.find_all("stops").expect("find");
        assert_eq!(records[0], record("a", "1", 40.25));
        let stats = sink.stats("stops").expect("stats");
        assert_eq!(stats.count, 2);
        assert_eq!(stats.last_inserted_id.as_deref(), Some("2"));
        assert_eq!(sink.stats("routes").expect("stats"), CollectionStats::default());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn damaged_sequence_file_resumes_after_highest_stored_id() {
        let dir = temp_dir("gtfs_file_sink_sequence");
        let sink = FileSink::open(&dir).expect("open");
        sink.insert_many("stops", &[record("a", "1", 1.0), record("b", "2", 2.0)])
            .expect("insert");
        let before = sink.stats("stops").expect("stats");

        fs::write(dir.join("stops").join(SEQUENCE_FILE), "garbage").expect("write");
        sink.insert_many("stops", &[record("a", "3", 3.0)]).expect("insert");
        let after = sink.stats("stops").expect("stats");
        assert_eq!(after.count, 3);
        assert_eq!(after.last_inserted_id.as_deref(), Some("3"));
        assert_ne!(after, before);

        fs::remove_file(dir.join("stops").join(SEQUENCE_FILE)).expect("remove");
        let b = AgencyKey::new("b").expect("key");
        sink.delete_where("stops", &b).expect("delete");
        sink.insert_many("stops", &[record("b", "4", 4.0)]).expect("insert");
        assert_eq!(
            sink.stats("stops").expect("stats").last_inserted_id.as_deref(),
            Some("4")
        );

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn corrupt_lines_are_reported_with_position() {
        let dir = temp_dir("gtfs_file_sink_corrupt");
        let sink = FileSink::open(&dir).expect("open");
        fs::create_dir_all(dir.join("stops")).expect("mkdir");
        fs::write(dir.join("stops").join("a.ndjson"), "{\"id\":1,\"record\":{}}\nnot json\n")
            .expect("write");

        let err = sink.find_all("stops").expect_err("corrupt");
        assert!(matches!(err, SinkError::Corrupt { line: 2, .. }));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn escapes_path_components() {
        assert_eq!(escape_component("metro_1-a"), "metro_1-a");
        assert_eq!(escape_component("../x"), "%2E%2E%2Fx");
    }
}
