//! Cache error types
//!
//! This module defines the error type returned by every public cache operation.
//! Lookup misses are not errors (they are `Option::None`), and capacity pressure
//! is handled internally by eviction, so neither appears here.

use thiserror::Error;

use super::entry::ContentKey;

/// Errors surfaced by the cache core
///
/// The type is `Clone` so a single download outcome can be handed to every
/// waiter attached to the same in-flight task.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// Network/transport failure (including timeouts). No partial state is kept.
    #[error("Transfer failed for {url}: {reason}")]
    TransferFailed { url: String, reason: String },

    /// Downloaded content is empty, corrupt or unusable
    #[error("Invalid content for {key}: {reason}")]
    InvalidContent { key: ContentKey, reason: String },

    /// The in-flight download was cancelled
    #[error("Download cancelled for {key}")]
    Cancelled { key: ContentKey },

    /// The resource pool could not initialize a decoder
    #[error("Handle initialization failed for {key}: {reason}")]
    HandleInitFailed { key: ContentKey, reason: String },

    /// The index snapshot could not be written
    #[error("Index persistence failed: {0}")]
    PersistenceFailed(String),

    /// Local filesystem error
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The manager has been shut down
    #[error("Cache manager is shut down")]
    ShutDown,
}

impl CacheError {
    /// Whether the caller may reasonably retry the operation
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CacheError::TransferFailed { .. }
                | CacheError::Cancelled { .. }
                | CacheError::HandleInitFailed { .. }
        )
    }

    pub(crate) fn transfer(url: &str, reason: impl std::fmt::Display) -> Self {
        CacheError::TransferFailed {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::PersistenceFailed(err.to_string())
    }
}

/// Result alias used across the crate
pub type CacheResult<T> = Result<T, CacheError>;
