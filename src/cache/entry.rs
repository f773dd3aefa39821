//! Content key type
//!
//! A `ContentKey` identifies one cached video. It is the lowercase hex SHA-256
//! digest of the normalized source URL, so the same video reached through
//! cosmetically different URLs (host case, default port, fragment) maps to the
//! same cache entry, and keys are safe to use as file names.

use http::Uri;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Length of a hex encoded SHA-256 digest
const KEY_HEX_LEN: usize = 64;

/// Content-addressed cache key
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentKey(String);

impl ContentKey {
    /// Derive the key for a source URL
    pub fn from_url(url: &str) -> Self {
        let normalized = normalize_url(url);
        let digest = Sha256::digest(normalized.as_bytes());
        Self(hex::encode(digest))
    }

    /// Parse a key previously produced by `from_url` (e.g. read back from the index)
    ///
    /// Returns None unless the string is a 64 character lowercase hex digest.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == KEY_HEX_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize a source URL before hashing
///
/// Lowercases scheme and host, drops the fragment and a default port, and turns
/// an empty path into `/`. The query string is kept verbatim because CDNs
/// commonly put signed tokens or renditions there. Strings that are not
/// absolute URIs are only trimmed and stripped of their fragment.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_fragment = match trimmed.find('#') {
        Some(idx) => &trimmed[..idx],
        None => trimmed,
    };

    let uri: Uri = match without_fragment.parse() {
        Ok(uri) => uri,
        Err(_) => return without_fragment.to_string(),
    };

    let (Some(scheme), Some(authority)) = (uri.scheme_str(), uri.authority()) else {
        return without_fragment.to_string();
    };

    let scheme = scheme.to_ascii_lowercase();
    let default_port = match scheme.as_str() {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    };

    let mut normalized = format!("{}://", scheme);
    if let Some((userinfo, _)) = authority.as_str().rsplit_once('@') {
        normalized.push_str(userinfo);
        normalized.push('@');
    }
    normalized.push_str(&authority.host().to_ascii_lowercase());
    if let Some(port) = authority.port_u16() {
        if Some(port) != default_port {
            let _ = write!(normalized, ":{}", port);
        }
    }

    let path = uri.path();
    normalized.push_str(if path.is_empty() { "/" } else { path });
    if let Some(query) = uri.query() {
        normalized.push('?');
        normalized.push_str(query);
    }

    normalized
}
