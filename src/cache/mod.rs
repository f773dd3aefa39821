// Cache module
//
// Disk-backed, size-bounded video cache:
// - `entry`: content key derivation
// - `disk`: index, persistence and the filesystem backend
// - `eviction`: capacity enforcement and expiry purge
// - `stats`: counters and the aggregate snapshot

pub mod config;
pub mod disk;
pub mod entry;
pub mod error;
pub mod eviction;
pub mod stats;

pub use config::CacheConfig;
pub use disk::{CacheEntry, CacheIndex};
pub use entry::{normalize_url, ContentKey};
pub use error::{CacheError, CacheResult};
pub use eviction::{
    enforce_capacity, purge_expired, EvictionCandidate, EvictionPolicy, EvictionReport, LruPolicy,
};
pub use stats::{CacheStats, CacheStatsTracker};
