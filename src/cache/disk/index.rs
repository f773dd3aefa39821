//! Cache index management
//!
//! The index maps content keys to the files stored in the cache directory. It
//! lives in memory and is written in full to `index.json` after every mutation.
//! A failed write is logged and the in-memory state stays authoritative for the
//! rest of the process lifetime.

use super::backend::DiskBackend;
use super::key_lock::KeyLocks;
use super::types::{CacheEntry, PersistedEntry};
use super::utils::{index_file_path, is_temp_file, key_from_file_name};
use crate::cache::eviction::{self, EvictionCandidate, EvictionPolicy, EvictionReport, LruPolicy};
use crate::cache::stats::CacheStatsTracker;
use crate::cache::{CacheError, CacheResult, ContentKey};
use crate::clock::Clock;
use crate::constants::INDEX_VERSION;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Outcome of `validate_and_repair`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RepairReport {
    /// Entries dropped because their file was missing or empty
    pub dropped_entries: usize,
    /// Content files on disk that no entry referenced
    pub orphans_deleted: usize,
    /// Leftover partial writes
    pub temp_files_deleted: usize,
}

/// Thread-safe in-memory index of cached files
pub struct CacheIndex {
    cache_dir: PathBuf,
    index_path: PathBuf,
    max_bytes: u64,
    entries: RwLock<HashMap<ContentKey, CacheEntry>>,
    total_size: AtomicU64,
    next_seq: AtomicU64,
    key_locks: KeyLocks,
    persist_lock: tokio::sync::Mutex<()>,
    backend: Arc<dyn DiskBackend>,
    clock: Arc<dyn Clock>,
    policy: Arc<dyn EvictionPolicy>,
    stats: CacheStatsTracker,
}

impl CacheIndex {
    /// Create an empty index for `cache_dir`
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        max_bytes: u64,
        backend: Arc<dyn DiskBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache_dir = cache_dir.into();
        Self {
            index_path: index_file_path(&cache_dir),
            cache_dir,
            max_bytes,
            entries: RwLock::new(HashMap::new()),
            total_size: AtomicU64::new(0),
            next_seq: AtomicU64::new(0),
            key_locks: KeyLocks::new(),
            persist_lock: tokio::sync::Mutex::new(()),
            backend,
            clock,
            policy: Arc::new(LruPolicy),
            stats: CacheStatsTracker::new(),
        }
    }

    /// Replace the eviction policy (LRU by default)
    pub fn with_policy(mut self, policy: Arc<dyn EvictionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Load the index snapshot from `cache_dir`
    ///
    /// A missing, unreadable or unparsable snapshot yields an empty index.
    /// Individual malformed entries are skipped.
    pub async fn load(
        cache_dir: impl Into<PathBuf>,
        max_bytes: u64,
        backend: Arc<dyn DiskBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let index = Self::new(cache_dir, max_bytes, backend, clock);

        let data = match index.backend.read_file(&index.index_path).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => {
                tracing::debug!(path = %index.index_path.display(), "No index snapshot, starting empty");
                return index;
            }
            Err(e) => {
                tracing::warn!(
                    path = %index.index_path.display(),
                    error = %e,
                    "Failed to read index snapshot, starting empty"
                );
                return index;
            }
        };

        let snapshot: RawSnapshot = match serde_json::from_slice(&data) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(
                    path = %index.index_path.display(),
                    error = %e,
                    "Failed to parse index snapshot, starting empty"
                );
                return index;
            }
        };

        if snapshot.version != INDEX_VERSION {
            tracing::warn!(
                found = snapshot.version,
                expected = INDEX_VERSION,
                "Index snapshot version mismatch, loading entries anyway"
            );
        }

        let mut loaded = Vec::with_capacity(snapshot.entries.len());
        let mut skipped = 0usize;
        for (raw_key, value) in snapshot.entries {
            let Some(key) = ContentKey::parse(&raw_key) else {
                skipped += 1;
                tracing::warn!(key = %raw_key, "Skipping index entry with malformed key");
                continue;
            };
            match serde_json::from_value::<PersistedEntry>(value) {
                Ok(persisted) => loaded.push(persisted.into_entry(key)),
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(key = %key, error = %e, "Skipping malformed index entry");
                }
            }
        }

        // Oldest first so insertion order survives a restart for LRU ties
        loaded.sort_by(|a, b| {
            (a.created_at, a.key.as_str()).cmp(&(b.created_at, b.key.as_str()))
        });

        {
            let mut entries = index.entries.write();
            let mut total = 0u64;
            for mut entry in loaded {
                entry.seq = index.next_seq.fetch_add(1, Ordering::SeqCst);
                total += entry.file_size;
                entries.insert(entry.key.clone(), entry);
            }
            index.total_size.store(total, Ordering::SeqCst);
        }

        tracing::info!(
            entries = index.entry_count(),
            total_bytes = index.total_size(),
            skipped,
            "Loaded cache index"
        );

        index
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    pub fn policy(&self) -> &dyn EvictionPolicy {
        self.policy.as_ref()
    }

    pub fn stats(&self) -> &CacheStatsTracker {
        &self.stats
    }

    /// Return a valid entry for `key`, updating its access time
    ///
    /// An expired entry, or one whose file is missing or empty, is removed
    /// (deleting the file if it still exists) and reported as a miss.
    pub async fn lookup(&self, key: &ContentKey) -> Option<CacheEntry> {
        self.lookup_inner(key, true).await
    }

    /// Same as `lookup` without touching hit/miss counters
    pub(crate) async fn revalidate(&self, key: &ContentKey) -> Option<CacheEntry> {
        self.lookup_inner(key, false).await
    }

    async fn lookup_inner(&self, key: &ContentKey, count: bool) -> Option<CacheEntry> {
        let hit = {
            let _guard = self.key_locks.lock(key).await;
            self.lookup_locked(key).await
        };

        let entry = match hit {
            Lookup::Hit(entry) => {
                self.persist_logged().await;
                Some(entry)
            }
            Lookup::Stale => {
                self.persist_logged().await;
                None
            }
            Lookup::Miss => None,
        };

        if count {
            match entry {
                Some(_) => self.stats.increment_hits(),
                None => self.stats.increment_misses(),
            }
        }
        entry
    }

    async fn lookup_locked(&self, key: &ContentKey) -> Lookup {
        let Some(entry) = self.peek(key) else {
            return Lookup::Miss;
        };

        let now = self.now();
        if entry.is_expired(now) {
            tracing::debug!(key = %key.short(), "Cache entry expired");
            self.remove_locked(key).await;
            return Lookup::Stale;
        }

        let actual_size = match self.backend.file_size(&entry.file_path).await {
            Ok(size) if size > 0 => size,
            Ok(_) | Err(_) => {
                tracing::debug!(
                    key = %key.short(),
                    path = %entry.file_path.display(),
                    "Cached file missing or empty, dropping entry"
                );
                self.remove_locked(key).await;
                return Lookup::Stale;
            }
        };

        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(current) => {
                if current.file_size != actual_size {
                    // Keep total_size honest if the file changed behind our back
                    self.total_size.fetch_add(actual_size, Ordering::SeqCst);
                    self.total_size.fetch_sub(current.file_size, Ordering::SeqCst);
                    current.file_size = actual_size;
                }
                current.last_access_time = now.max(current.last_access_time);
                Lookup::Hit(current.clone())
            }
            None => Lookup::Miss,
        }
    }

    /// Add or replace an entry, persist, then enforce capacity
    pub async fn insert(&self, mut entry: CacheEntry) -> EvictionReport {
        let key = entry.key.clone();
        {
            let _guard = self.key_locks.lock(&key).await;
            entry.seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            let size = entry.file_size;
            let new_path = entry.file_path.clone();
            let replaced = self.entries.write().insert(key.clone(), entry);
            self.total_size.fetch_add(size, Ordering::SeqCst);

            if let Some(old) = replaced {
                self.total_size.fetch_sub(old.file_size, Ordering::SeqCst);
                if old.file_path != new_path {
                    self.delete_file_logged(&old.key, &old.file_path).await;
                }
            }
        }

        tracing::debug!(key = %key.short(), total_bytes = self.total_size(), "Inserted cache entry");
        self.persist_logged().await;

        eviction::enforce_capacity(self, self.max_bytes).await
    }

    /// Delete the entry and its file
    pub async fn remove(&self, key: &ContentKey) -> Option<CacheEntry> {
        let removed = {
            let _guard = self.key_locks.lock(key).await;
            self.remove_locked(key).await
        };
        if removed.is_some() {
            self.persist_logged().await;
        }
        removed
    }

    /// Remove an eviction candidate if it has not been touched since it was selected
    pub(crate) async fn evict_candidate(&self, candidate: &EvictionCandidate) -> Option<CacheEntry> {
        let _guard = self.key_locks.lock(&candidate.key).await;
        let unchanged = self
            .entries
            .read()
            .get(&candidate.key)
            .map(|e| e.seq == candidate.seq && e.last_access_time == candidate.last_access_time)
            .unwrap_or(false);
        if !unchanged {
            return None;
        }
        self.remove_locked(&candidate.key).await
    }

    /// Remove `key` if it is expired at `now`
    pub(crate) async fn evict_if_expired(&self, key: &ContentKey, now: u64) -> Option<CacheEntry> {
        let _guard = self.key_locks.lock(key).await;
        let expired = self
            .entries
            .read()
            .get(key)
            .map(|e| e.is_expired(now))
            .unwrap_or(false);
        if !expired {
            return None;
        }
        self.remove_locked(key).await
    }

    /// Remove the entry and delete its file. Caller holds the key lock.
    async fn remove_locked(&self, key: &ContentKey) -> Option<CacheEntry> {
        let removed = self.entries.write().remove(key);
        if let Some(ref entry) = removed {
            self.total_size.fetch_sub(entry.file_size, Ordering::SeqCst);
            self.delete_file_logged(key, &entry.file_path).await;
        }
        removed
    }

    async fn delete_file_logged(&self, key: &ContentKey, path: &Path) {
        if let Err(e) = self.backend.delete_file(path).await {
            tracing::warn!(
                key = %key.short(),
                path = %path.display(),
                error = %e,
                "Failed to delete cached file"
            );
        }
    }

    /// Remove every entry and file
    pub async fn clear(&self) -> usize {
        let keys = self.keys();
        let mut removed = 0;
        for key in &keys {
            let _guard = self.key_locks.lock(key).await;
            if self.remove_locked(key).await.is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            self.persist_logged().await;
        }
        removed
    }

    /// Entry for `key` without validity checks or side effects
    pub fn peek(&self, key: &ContentKey) -> Option<CacheEntry> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains(&self, key: &ContentKey) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn total_size(&self) -> u64 {
        self.total_size.load(Ordering::SeqCst)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    pub fn keys(&self) -> Vec<ContentKey> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<CacheEntry> {
        self.entries.read().values().cloned().collect()
    }

    /// Number of entries expired at `now` that have not been purged yet
    pub fn expired_count(&self, now: u64) -> usize {
        self.entries
            .read()
            .values()
            .filter(|e| e.is_expired(now))
            .count()
    }

    pub(crate) fn expired_keys(&self, now: u64) -> Vec<ContentKey> {
        self.entries
            .read()
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key.clone())
            .collect()
    }

    pub(crate) fn eviction_candidates(&self) -> Vec<EvictionCandidate> {
        self.entries
            .read()
            .values()
            .map(EvictionCandidate::from)
            .collect()
    }

    /// Write the snapshot to disk
    pub async fn persist(&self) -> CacheResult<()> {
        let _persist = self.persist_lock.lock().await;

        // Snapshot under the persist lock so the last writer always writes the latest state
        let snapshot = {
            let entries = self.entries.read();
            Snapshot {
                version: INDEX_VERSION,
                entries: entries
                    .iter()
                    .map(|(k, v)| (k.as_str().to_string(), PersistedEntry::from(v)))
                    .collect(),
            }
        };

        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| CacheError::PersistenceFailed(e.to_string()))?;
        self.backend
            .write_file_atomic(&self.index_path, Bytes::from(json))
            .await
            .map_err(|e| CacheError::PersistenceFailed(e.to_string()))
    }

    /// Persist, logging instead of failing
    pub(crate) async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            tracing::warn!(
                path = %self.index_path.display(),
                error = %e,
                "Index persistence failed, continuing with in-memory state"
            );
        }
    }

    /// Reconcile the index with the cache directory
    ///
    /// Drops entries whose file is missing or empty, recomputes sizes from
    /// disk, deletes content files no entry references and leftover temp files.
    pub async fn validate_and_repair(&self) -> CacheResult<RepairReport> {
        let mut report = RepairReport::default();

        let files = match self.backend.read_dir(&self.cache_dir).await {
            Ok(files) => files,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        for entry in self.entries() {
            let _guard = self.key_locks.lock(&entry.key).await;
            match self.backend.file_size(&entry.file_path).await {
                Ok(size) if size > 0 => {
                    if size != entry.file_size {
                        if let Some(current) = self.entries.write().get_mut(&entry.key) {
                            current.file_size = size;
                        }
                    }
                }
                _ => {
                    self.remove_locked(&entry.key).await;
                    report.dropped_entries += 1;
                }
            }
        }

        let referenced: HashSet<PathBuf> = self
            .entries
            .read()
            .values()
            .map(|e| e.file_path.clone())
            .collect();

        for path in files {
            if path == self.index_path {
                continue;
            }
            if is_temp_file(&path) {
                if self.backend.delete_file(&path).await.is_ok() {
                    report.temp_files_deleted += 1;
                }
                continue;
            }
            if key_from_file_name(&path).is_some() && !referenced.contains(&path) {
                if self.backend.delete_file(&path).await.is_ok() {
                    report.orphans_deleted += 1;
                }
            }
        }

        let recomputed: u64 = self.entries.read().values().map(|e| e.file_size).sum();
        self.total_size.store(recomputed, Ordering::SeqCst);

        if report != RepairReport::default() {
            tracing::info!(
                dropped_entries = report.dropped_entries,
                orphans_deleted = report.orphans_deleted,
                temp_files_deleted = report.temp_files_deleted,
                "Repaired cache index"
            );
        }
        self.persist_logged().await;

        Ok(report)
    }
}

enum Lookup {
    Hit(CacheEntry),
    Stale,
    Miss,
}

/// Serializable snapshot of the cache index
#[derive(Serialize)]
struct Snapshot {
    version: u32,
    entries: BTreeMap<String, PersistedEntry>,
}

/// Loosely typed snapshot so one bad entry cannot fail the whole load
#[derive(Deserialize)]
struct RawSnapshot {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    entries: serde_json::Map<String, serde_json::Value>,
}
