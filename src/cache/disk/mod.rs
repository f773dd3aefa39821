//! Disk-backed cache storage
//!
//! This module provides the persistent side of the cache:
//! - **CacheIndex**: key → file metadata, persisted as a JSON snapshot
//! - **DiskBackend**: filesystem seam with a portable tokio::fs implementation
//!
//! Content files live directly in the cache directory as `<key>.<ext>` next
//! to `index.json`. Partial writes use a `.tmp` suffix and are cleaned up on
//! startup.

pub use self::backend::DiskBackend;
pub use self::error::DiskCacheError;
pub use self::index::{CacheIndex, RepairReport};
pub use self::tokio_backend::{temp_path_for, TokioFsBackend};
pub use self::types::CacheEntry;
pub use self::utils::{content_file_path, infer_extension};

pub mod backend;
mod error;
mod index;
mod key_lock;
pub mod tokio_backend;
mod types;
mod utils;
