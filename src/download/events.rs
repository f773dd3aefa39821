//! Download lifecycle events

use std::path::PathBuf;

use crate::cache::{CacheError, ContentKey};

/// Events published by the download coordinator
///
/// Every transfer emits `Started`, zero or more `Progress`, then exactly one
/// of `Completed`, `Failed` or `Cancelled`. A fetch served from the index
/// emits nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Started {
        key: ContentKey,
        url: String,
    },
    Progress {
        key: ContentKey,
        downloaded: u64,
        /// Content length when the server announced one
        total: Option<u64>,
    },
    Completed {
        key: ContentKey,
        path: PathBuf,
        bytes: u64,
    },
    Failed {
        key: ContentKey,
        error: CacheError,
    },
    Cancelled {
        key: ContentKey,
    },
}

impl DownloadEvent {
    pub fn key(&self) -> &ContentKey {
        match self {
            DownloadEvent::Started { key, .. }
            | DownloadEvent::Progress { key, .. }
            | DownloadEvent::Completed { key, .. }
            | DownloadEvent::Failed { key, .. }
            | DownloadEvent::Cancelled { key } => key,
        }
    }

    /// Whether this event ends a transfer
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadEvent::Completed { .. }
                | DownloadEvent::Failed { .. }
                | DownloadEvent::Cancelled { .. }
        )
    }
}
