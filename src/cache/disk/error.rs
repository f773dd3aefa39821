//! Error types for disk backend operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiskCacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DiskCacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DiskCacheError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

// Conversion to CacheError
impl From<DiskCacheError> for crate::cache::CacheError {
    fn from(err: DiskCacheError) -> Self {
        match err {
            DiskCacheError::Io(e) => crate::cache::CacheError::Io(e.to_string()),
        }
    }
}
