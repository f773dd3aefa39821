//! Cache configuration types
//!
//! This module defines the `cache:` section of the configuration file:
//! - Enable/disable local caching (disabled = always play from the network)
//! - Cache directory and byte budget
//! - Entry lifetime and the background purge interval

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_CACHE_DIR, DEFAULT_CACHE_DURATION_SECS, DEFAULT_MAX_CACHE_BYTES,
    DEFAULT_PURGE_INTERVAL_SECS,
};

/// Main cache configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable local caching (default: true)
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Directory holding content files and `index.json`
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    /// Byte budget for all cached files (default: 500 MB)
    #[serde(default = "default_max_cache_bytes")]
    pub max_cache_bytes: u64,
    /// Lifetime of a cached file (default: 7 days)
    #[serde(default = "default_cache_duration_seconds")]
    pub cache_duration_seconds: u64,
    /// Interval between background expiry purges, 0 disables (default: 0)
    #[serde(default = "default_purge_interval_seconds")]
    pub purge_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            cache_dir: default_cache_dir(),
            max_cache_bytes: default_max_cache_bytes(),
            cache_duration_seconds: default_cache_duration_seconds(),
            purge_interval_seconds: default_purge_interval_seconds(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_cache_dir() -> String {
    DEFAULT_CACHE_DIR.to_string()
}

fn default_max_cache_bytes() -> u64 {
    DEFAULT_MAX_CACHE_BYTES
}

fn default_cache_duration_seconds() -> u64 {
    DEFAULT_CACHE_DURATION_SECS
}

fn default_purge_interval_seconds() -> u64 {
    DEFAULT_PURGE_INTERVAL_SECS
}

impl CacheConfig {
    pub fn cache_dir_path(&self) -> PathBuf {
        PathBuf::from(&self.cache_dir)
    }

    pub fn cache_duration(&self) -> Duration {
        Duration::from_secs(self.cache_duration_seconds)
    }

    /// Background purge interval, `None` when disabled
    pub fn purge_interval(&self) -> Option<Duration> {
        (self.purge_interval_seconds > 0).then(|| Duration::from_secs(self.purge_interval_seconds))
    }

    /// Validate cache configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.enabled && self.cache_dir.trim().is_empty() {
            return Err("cache.cache_dir cannot be empty when caching is enabled".to_string());
        }
        if self.max_cache_bytes == 0 {
            return Err("cache.max_cache_bytes must be greater than 0".to_string());
        }
        if self.cache_duration_seconds == 0 {
            return Err("cache.cache_duration_seconds must be greater than 0".to_string());
        }
        Ok(())
    }
}
