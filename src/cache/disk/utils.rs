//! Utility functions for disk cache

use crate::cache::ContentKey;
use crate::constants::{DEFAULT_CONTENT_EXTENSION, INDEX_FILE_NAME, TEMP_FILE_SUFFIX};
use std::path::{Path, PathBuf};

const MAX_EXTENSION_LEN: usize = 5;

/// Infer the content file extension from the URL path
///
/// Uses the extension of the last path segment when it is 1-5 ASCII
/// alphanumerics, lowercased; otherwise the default video extension.
pub fn infer_extension(url: &str) -> String {
    let without_query = url
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let after_scheme = without_query
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(without_query);
    // The first segment after the scheme is the host, never a file name
    let Some((_, path)) = after_scheme.split_once('/') else {
        return DEFAULT_CONTENT_EXTENSION.to_string();
    };
    let segment = path.rsplit('/').next().unwrap_or_default();

    match segment.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && (1..=MAX_EXTENSION_LEN).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext.to_ascii_lowercase()
        }
        _ => DEFAULT_CONTENT_EXTENSION.to_string(),
    }
}

/// Final path of a content file: `<cache_dir>/<key>.<ext>`
pub fn content_file_path(cache_dir: &Path, key: &ContentKey, extension: &str) -> PathBuf {
    cache_dir.join(format!("{}.{}", key, extension))
}

/// Path of the index snapshot
pub fn index_file_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(INDEX_FILE_NAME)
}

/// Whether a file name is a leftover partial write
pub fn is_temp_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e == TEMP_FILE_SUFFIX)
        .unwrap_or(false)
}

/// Key encoded in a content file name, if the name looks like `<key>.<ext>`
pub fn key_from_file_name(path: &Path) -> Option<ContentKey> {
    let name = path.file_name()?.to_str()?;
    let (stem, _) = name.split_once('.')?;
    ContentKey::parse(stem)
}
