// Reelcache: disk-backed video cache for vertical video feeds

pub mod cache;
pub mod clock;
pub mod config;
pub mod constants;
pub mod download;
pub mod logging;
pub mod manager;
pub mod pool;
pub mod request_coalescing;
pub mod retry;

pub use cache::{CacheError, CacheResult, CacheStats, ContentKey};
pub use manager::CacheManager;
