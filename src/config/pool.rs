//! Resource pool and playback configuration types.

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_MAX_HANDLES;

fn default_max_handles() -> usize {
    DEFAULT_MAX_HANDLES
}

/// Decoder handle pool configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of live decoder handles (default: 3)
    #[serde(default = "default_max_handles")]
    pub max_handles: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_handles: default_max_handles(),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_handles == 0 {
            return Err("pool.max_handles must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Playback behaviour on a cache miss
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Start playing from the network while the file downloads in the
    /// background, instead of waiting for the download (default: false)
    #[serde(default)]
    pub stream_while_downloading: bool,
}
