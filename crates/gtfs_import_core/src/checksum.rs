use compact_str::CompactString;
use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::sink::CollectionStats;

/// Fingerprint of a collection's contents, derived from its size and newest id.
pub fn collection_checksum(stats: &CollectionStats) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stats.count.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(stats.last_inserted_id.as_deref().unwrap_or("").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Whether a client holding `stored` must download the collection again.
pub fn needs_refresh(stored: Option<&str>, current: &str) -> bool {
    stored != Some(current)
}

/// Memoized checksums per collection, cleared after each import.
#[derive(Debug, Default)]
pub struct ChecksumCache {
    entries: DashMap<CompactString, String>,
}

impl ChecksumCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compute<E>(
        &self,
        collection: &str,
        compute: impl FnOnce() -> Result<String, E>,
    ) -> Result<String, E> {
        if let Some(cached) = self.entries.get(collection) {
            return Ok(cached.clone());
        }
        let checksum = compute()?;
        self.entries
            .insert(CompactString::from(collection), checksum.clone());
        Ok(checksum)
    }

    pub fn invalidate(&self) {
        self.entries.clear();
    }
}
