//! Type definitions for disk cache

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::cache::ContentKey;

/// Metadata for a cached file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: ContentKey,
    pub file_path: PathBuf,
    pub file_size: u64,
    /// Milliseconds since the Unix epoch
    pub created_at: u64,
    pub last_access_time: u64,
    pub expiry_time: u64,
    /// Insertion order, used to break LRU ties. Assigned by the index.
    pub(crate) seq: u64,
}

impl CacheEntry {
    /// Create an entry for a freshly written file
    pub fn new(
        key: ContentKey,
        file_path: PathBuf,
        file_size: u64,
        created_at: u64,
        expiry_time: u64,
    ) -> Self {
        Self {
            key,
            file_path,
            file_size,
            created_at,
            last_access_time: created_at,
            expiry_time,
            seq: 0,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expiry_time
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// On-disk form of an entry (the key is the map key of the snapshot)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PersistedEntry {
    pub file_path: PathBuf,
    pub file_size: u64,
    pub created_at: u64,
    pub last_access_time: u64,
    pub expiry_time: u64,
}

impl PersistedEntry {
    pub fn into_entry(self, key: ContentKey) -> CacheEntry {
        CacheEntry {
            key,
            file_path: self.file_path,
            file_size: self.file_size,
            created_at: self.created_at,
            last_access_time: self.last_access_time,
            expiry_time: self.expiry_time,
            seq: 0,
        }
    }
}

impl From<&CacheEntry> for PersistedEntry {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            file_path: entry.file_path.clone(),
            file_size: entry.file_size,
            created_at: entry.created_at,
            last_access_time: entry.last_access_time,
            expiry_time: entry.expiry_time,
        }
    }
}
