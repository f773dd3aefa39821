// Constants module - centralized default values for configuration
//
// This module defines all default values used throughout the codebase.
// Using constants instead of magic numbers improves maintainability
// and makes it easier to understand and modify defaults.

// =============================================================================
// Cache defaults
// =============================================================================

/// Default cache directory
pub const DEFAULT_CACHE_DIR: &str = "/var/cache/reelcache";

/// Default maximum cache size in bytes (500 MB)
pub const DEFAULT_MAX_CACHE_BYTES: u64 = 500 * 1024 * 1024;

/// Default lifetime of a cached file in seconds (7 days)
pub const DEFAULT_CACHE_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Default interval between background expiry purges (0 = disabled)
pub const DEFAULT_PURGE_INTERVAL_SECS: u64 = 0;

/// Name of the index snapshot inside the cache directory
pub const INDEX_FILE_NAME: &str = "index.json";

/// Version written into the index snapshot
pub const INDEX_VERSION: u32 = 1;

/// Extension used when the URL path carries none
pub const DEFAULT_CONTENT_EXTENSION: &str = "mp4";

/// Suffix for partially written files
pub const TEMP_FILE_SUFFIX: &str = "tmp";

// =============================================================================
// Download defaults
// =============================================================================

/// Default total timeout for a single transfer in seconds
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 30;

/// Default TCP connect timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default User-Agent sent with content requests
pub const DEFAULT_USER_AGENT: &str = concat!("reelcache/", env!("CARGO_PKG_VERSION"));

/// Capacity of the download event broadcast channel
pub const DOWNLOAD_EVENT_BUFFER_SIZE: usize = 256;

// =============================================================================
// Preload defaults
// =============================================================================

/// Default number of feed items preloaded after the current one
pub const DEFAULT_MAX_PRELOAD_AHEAD: usize = 3;

/// Default number of feed items kept warm before the current one
pub const DEFAULT_MAX_PRELOAD_BEHIND: usize = 1;

// =============================================================================
// Resource pool defaults
// =============================================================================

/// Default number of live decoder handles
pub const DEFAULT_MAX_HANDLES: usize = 3;

// =============================================================================
// Retry defaults (caller-side)
// =============================================================================

/// Default maximum attempts including the first one
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Default initial backoff in milliseconds
pub const DEFAULT_RETRY_INITIAL_BACKOFF_MS: u64 = 200;

/// Default backoff cap in milliseconds
pub const DEFAULT_RETRY_MAX_BACKOFF_MS: u64 = 2000;
