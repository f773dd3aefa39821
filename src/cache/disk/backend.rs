//! Backend trait for filesystem operations

use super::error::DiskCacheError;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

/// Abstraction over filesystem operations used by the cache index
///
/// Content files are streamed by the download coordinator straight to a
/// temporary path; everything else that touches the cache directory goes
/// through this trait.
#[async_trait]
pub trait DiskBackend: Send + Sync {
    /// Read entire file contents
    async fn read_file(&self, path: &Path) -> Result<Bytes, DiskCacheError>;

    /// Write file contents atomically (using temp file + rename)
    async fn write_file_atomic(&self, path: &Path, data: Bytes) -> Result<(), DiskCacheError>;

    /// Delete a file. Deleting a missing file is not an error.
    async fn delete_file(&self, path: &Path) -> Result<(), DiskCacheError>;

    /// Create directory and all parent directories
    async fn create_dir_all(&self, path: &Path) -> Result<(), DiskCacheError>;

    /// Size of a regular file in bytes
    async fn file_size(&self, path: &Path) -> Result<u64, DiskCacheError>;

    /// List all files in a directory
    async fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>, DiskCacheError>;
}
