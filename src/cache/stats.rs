//! Cache statistics types
//!
//! This module provides structures for tracking cache performance metrics:
//! - `CacheStats`: Aggregate snapshot returned by `CacheManager::stats`
//! - `CacheStatsTracker`: Lock-free hit/miss/eviction counters

use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of entries in the index
    pub file_count: u64,
    /// Sum of entry sizes in bytes
    pub total_bytes: u64,
    /// Entries whose expiry time has passed but which are not purged yet
    pub expired_count: u64,
    /// Directory holding the index and content files
    pub cache_directory: PathBuf,
    /// Configured capacity in bytes
    pub max_bytes: u64,
    /// Number of valid lookups
    pub hits: u64,
    /// Number of lookups that found nothing usable
    pub misses: u64,
    /// Entries removed by capacity enforcement or expiry
    pub evictions: u64,
    /// Live decoder handles in the resource pool
    pub live_handles: u64,
    /// Downloads currently in flight
    pub in_flight_downloads: u64,
}

impl CacheStats {
    /// Calculate hit rate (hits / total lookups)
    /// Returns 0.0 if there were no lookups
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Statistics tracker using atomics for thread safety
#[derive(Debug, Default)]
pub struct CacheStatsTracker {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_hits(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_misses(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}
