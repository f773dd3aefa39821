//! Download configuration types.
//!
//! Controls the HTTP transport used to fill the cache:
//! - Whole-transfer timeout
//! - TCP connect timeout
//! - User-Agent header

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_DOWNLOAD_TIMEOUT_SECS, DEFAULT_USER_AGENT,
};

fn default_timeout_seconds() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_connect_timeout_seconds() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

/// Download configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Upper bound for one transfer, connect to last byte (default: 30)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// TCP connect timeout (default: 10)
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
            user_agent: default_user_agent(),
        }
    }
}

impl DownloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_seconds == 0 {
            return Err("download.timeout_seconds must be greater than 0".to_string());
        }
        if self.connect_timeout_seconds == 0 {
            return Err("download.connect_timeout_seconds must be greater than 0".to_string());
        }
        Ok(())
    }
}
