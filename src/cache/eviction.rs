//! Eviction policy
//!
//! `enforce_capacity` brings the index back under its byte budget by removing
//! entries in policy order; `purge_expired` drops everything past its expiry
//! time. Each victim is removed inside its key's critical section, so a
//! concurrent lookup never sees a half-deleted entry.

use crate::cache::disk::{CacheEntry, CacheIndex};
use crate::cache::ContentKey;

/// Snapshot of the fields eviction ordering depends on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub key: ContentKey,
    pub last_access_time: u64,
    pub seq: u64,
    pub file_size: u64,
}

impl From<&CacheEntry> for EvictionCandidate {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            last_access_time: entry.last_access_time,
            seq: entry.seq,
            file_size: entry.file_size,
        }
    }
}

/// Determines which entries should be evicted first
pub trait EvictionPolicy: Send + Sync {
    /// Sort candidates by eviction priority (first = most evictable)
    fn order(&self, candidates: &mut [EvictionCandidate]);
}

/// Strict least-recently-used ordering; ties broken by insertion order
#[derive(Debug, Default, Clone, Copy)]
pub struct LruPolicy;

impl EvictionPolicy for LruPolicy {
    fn order(&self, candidates: &mut [EvictionCandidate]) {
        candidates.sort_by_key(|c| (c.last_access_time, c.seq));
    }
}

/// What an eviction pass removed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EvictionReport {
    pub removed: usize,
    pub freed_bytes: u64,
}

impl EvictionReport {
    fn record(&mut self, entry: &CacheEntry) {
        self.removed += 1;
        self.freed_bytes += entry.file_size;
    }
}

/// Evict entries until `total_size <= max_bytes`
///
/// A no-op while the index is within budget. An entry that alone exceeds
/// `max_bytes` is evicted like any other. Candidates touched after the
/// ordering snapshot was taken are skipped, and the snapshot is rebuilt if
/// the budget still does not hold.
pub async fn enforce_capacity(index: &CacheIndex, max_bytes: u64) -> EvictionReport {
    let mut report = EvictionReport::default();

    while index.total_size() > max_bytes {
        let mut candidates = index.eviction_candidates();
        index.policy().order(&mut candidates);

        let mut progressed = false;
        for candidate in &candidates {
            if index.total_size() <= max_bytes {
                break;
            }
            if let Some(entry) = index.evict_candidate(candidate).await {
                tracing::debug!(
                    key = %entry.key.short(),
                    size = entry.file_size,
                    last_access_time = entry.last_access_time,
                    "Evicted cache entry for capacity"
                );
                report.record(&entry);
                progressed = true;
            }
        }

        if !progressed {
            break;
        }
    }

    if report.removed > 0 {
        index.stats().add_evictions(report.removed as u64);
        tracing::info!(
            removed = report.removed,
            freed_bytes = report.freed_bytes,
            total_bytes = index.total_size(),
            max_bytes,
            "Enforced cache capacity"
        );
        index.persist_logged().await;
    }

    report
}

/// Remove every entry whose expiry time is `<= now`, deleting its file
pub async fn purge_expired(index: &CacheIndex, now: u64) -> EvictionReport {
    let mut report = EvictionReport::default();

    for key in index.expired_keys(now) {
        if let Some(entry) = index.evict_if_expired(&key, now).await {
            report.record(&entry);
        }
    }

    if report.removed > 0 {
        index.stats().add_evictions(report.removed as u64);
        tracing::info!(
            removed = report.removed,
            freed_bytes = report.freed_bytes,
            "Purged expired cache entries"
        );
        index.persist_logged().await;
    }

    report
}
