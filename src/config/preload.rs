//! Feed preload window configuration.

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MAX_PRELOAD_AHEAD, DEFAULT_MAX_PRELOAD_BEHIND};

fn default_max_preload_ahead() -> usize {
    DEFAULT_MAX_PRELOAD_AHEAD
}

fn default_max_preload_behind() -> usize {
    DEFAULT_MAX_PRELOAD_BEHIND
}

/// How many feed neighbours `preload_window` warms around the current item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloadConfig {
    #[serde(default = "default_max_preload_ahead")]
    pub max_preload_ahead: usize,
    #[serde(default = "default_max_preload_behind")]
    pub max_preload_behind: usize,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            max_preload_ahead: default_max_preload_ahead(),
            max_preload_behind: default_max_preload_behind(),
        }
    }
}
