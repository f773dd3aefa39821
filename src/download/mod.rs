//! Download coordination
//!
//! `DownloadCoordinator` turns cache misses into files on disk:
//! - at most one transfer per content key, shared by every caller (coalescing)
//! - bodies stream to `<final>.tmp` and are renamed into place when complete
//! - transfers run on their own tokio task, so a caller going away never
//!   aborts a transfer other callers are waiting on
//! - failures, timeouts and cancellation delete the partial file and insert
//!   nothing; the same error reaches every waiter
//!
//! There is no retry here. Callers that want one wrap `fetch` with
//! `retry::RetryPolicy`.

pub mod events;
pub mod transport;

pub use events::DownloadEvent;
pub use transport::{HttpTransport, Transport, TransportResponse};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::cache::disk::{content_file_path, infer_extension, temp_path_for};
use crate::cache::{CacheEntry, CacheError, CacheIndex, CacheResult, ContentKey};
use crate::config::Config;
use crate::constants::DOWNLOAD_EVENT_BUFFER_SIZE;
use crate::request_coalescing::{CoalescingSlot, FetchOutcome, LeaderGuard, RequestCoalescer, Waiter};

/// Limits applied to every transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadSettings {
    /// Bound on one whole transfer, open to last byte
    pub timeout: Duration,
    /// Lifetime given to a freshly downloaded entry
    pub cache_duration: Duration,
    /// Content larger than this fails with `InvalidContent` and is never cached
    pub max_content_bytes: u64,
}

impl DownloadSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.download.timeout(),
            cache_duration: config.cache.cache_duration(),
            max_content_bytes: config.cache.max_cache_bytes,
        }
    }
}

/// Coalescing downloader that fills the cache index
#[derive(Clone)]
pub struct DownloadCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    index: Arc<CacheIndex>,
    transport: Arc<dyn Transport>,
    coalescer: RequestCoalescer,
    settings: DownloadSettings,
    events: broadcast::Sender<DownloadEvent>,
    root: CancellationToken,
}

impl DownloadCoordinator {
    pub fn new(
        index: Arc<CacheIndex>,
        transport: Arc<dyn Transport>,
        settings: DownloadSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(DOWNLOAD_EVENT_BUFFER_SIZE);
        Self {
            inner: Arc::new(Inner {
                index,
                transport,
                coalescer: RequestCoalescer::new(),
                settings,
                events,
                root: CancellationToken::new(),
            }),
        }
    }

    pub fn index(&self) -> &Arc<CacheIndex> {
        &self.inner.index
    }

    pub fn settings(&self) -> DownloadSettings {
        self.inner.settings
    }

    /// Return a local path for `url`, downloading it on a miss
    pub async fn fetch(&self, url: &str) -> CacheResult<PathBuf> {
        self.ensure_running()?;
        let key = ContentKey::from_url(url);
        if let Some(entry) = self.inner.index.lookup(&key).await {
            return Ok(entry.file_path);
        }
        self.start(url, key).wait().await
    }

    /// Join or start the transfer for `url` without consulting the index first
    ///
    /// The spawned task still re-checks the index before transferring.
    pub fn start_fetch(&self, url: &str) -> CacheResult<Waiter> {
        self.ensure_running()?;
        Ok(self.start(url, ContentKey::from_url(url)))
    }

    /// Start transfers for `urls` without waiting for them
    ///
    /// Each URL is independent; one failing never affects the others. The
    /// returned waiters may be dropped.
    pub fn preload<I, S>(&self, urls: I) -> Vec<Waiter>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if self.is_shut_down() {
            return Vec::new();
        }
        urls.into_iter()
            .map(|url| {
                let url = url.as_ref();
                self.start(url, ContentKey::from_url(url))
            })
            .collect()
    }

    /// Cancel the in-flight transfer for `key`
    ///
    /// Returns a waiter on the cancelled transfer, or `None` if nothing was
    /// in flight.
    pub fn cancel(&self, key: &ContentKey) -> Option<Waiter> {
        let waiter = self.inner.coalescer.cancel(key);
        if waiter.is_some() {
            tracing::info!(key = %key.short(), "Cancelling download");
        }
        waiter
    }

    pub fn is_in_flight(&self, key: &ContentKey) -> bool {
        self.inner.coalescer.is_in_flight(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.coalescer.in_flight_count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.root.is_cancelled()
    }

    /// Cancel every transfer and wait until each has cleaned up
    pub async fn shutdown(&self) {
        self.inner.root.cancel();
        let waiters = self.inner.coalescer.waiters();
        let pending = waiters.len();
        futures::future::join_all(waiters.into_iter().map(Waiter::wait)).await;
        tracing::info!(cancelled = pending, "Download coordinator shut down");
    }

    fn ensure_running(&self) -> CacheResult<()> {
        if self.is_shut_down() {
            return Err(CacheError::ShutDown);
        }
        Ok(())
    }

    fn start(&self, url: &str, key: ContentKey) -> Waiter {
        match self.inner.coalescer.acquire(&key, &self.inner.root) {
            CoalescingSlot::Follower(waiter) => {
                tracing::debug!(key = %key.short(), "Joining in-flight download");
                waiter
            }
            CoalescingSlot::Leader(leader) => {
                let waiter = leader.subscribe();
                let this = self.clone();
                let url = url.to_string();
                tokio::spawn(async move { this.run(url, leader).await });
                waiter
            }
        }
    }

    async fn run(self, url: String, leader: LeaderGuard) {
        let key = leader.key().clone();
        let cancel = leader.cancellation_token().clone();
        let outcome = self.download(&url, &key, &cancel).await;

        match &outcome {
            Ok(_) => {}
            Err(CacheError::Cancelled { .. }) => {
                tracing::info!(key = %key.short(), url = %url, "Download cancelled");
                self.emit(DownloadEvent::Cancelled { key: key.clone() });
            }
            Err(e) => {
                tracing::warn!(key = %key.short(), url = %url, error = %e, "Download failed");
                self.emit(DownloadEvent::Failed {
                    key: key.clone(),
                    error: e.clone(),
                });
            }
        }

        leader.complete(outcome);
    }

    async fn download(&self, url: &str, key: &ContentKey, cancel: &CancellationToken) -> FetchOutcome {
        let index = &self.inner.index;

        // Another task may have filled the entry between the caller's miss and now
        if let Some(entry) = index.revalidate(key).await {
            return Ok(entry.file_path);
        }

        let final_path = content_file_path(index.cache_dir(), key, &infer_extension(url));
        let temp_path = temp_path_for(&final_path);
        let timeout = self.inner.settings.timeout;

        tracing::info!(key = %key.short(), url = %url, "Starting download");
        self.emit(DownloadEvent::Started {
            key: key.clone(),
            url: url.to_string(),
        });

        let transferred = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CacheError::Cancelled { key: key.clone() }),
            result = tokio::time::timeout(timeout, self.transfer(url, key, &temp_path)) => match result {
                Ok(result) => result,
                Err(_) => Err(CacheError::transfer(
                    url,
                    format!("timed out after {}ms", timeout.as_millis()),
                )),
            },
        };

        let bytes = match transferred {
            Ok(bytes) if !cancel.is_cancelled() => bytes,
            Ok(_) => {
                discard_partial(&temp_path).await;
                return Err(CacheError::Cancelled { key: key.clone() });
            }
            Err(e) => {
                discard_partial(&temp_path).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
            discard_partial(&temp_path).await;
            return Err(e.into());
        }

        let now = index.now();
        let expiry_time = now.saturating_add(self.inner.settings.cache_duration.as_millis() as u64);
        index
            .insert(CacheEntry::new(key.clone(), final_path.clone(), bytes, now, expiry_time))
            .await;

        tracing::info!(
            key = %key.short(),
            path = %final_path.display(),
            bytes,
            "Download completed"
        );
        self.emit(DownloadEvent::Completed {
            key: key.clone(),
            path: final_path.clone(),
            bytes,
        });

        Ok(final_path)
    }

    /// Stream the body into `temp_path`, returning the byte count
    async fn transfer(&self, url: &str, key: &ContentKey, temp_path: &Path) -> CacheResult<u64> {
        let response = self.inner.transport.open(url).await?;
        let max = self.inner.settings.max_content_bytes;
        let total = response.content_length;

        if let Some(length) = total {
            if length > max {
                return Err(too_large(key, length, max));
            }
        }

        let mut file = tokio::fs::File::create(temp_path).await?;
        let mut body = response.body;
        let mut downloaded = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }
            downloaded += chunk.len() as u64;
            if downloaded > max {
                return Err(too_large(key, downloaded, max));
            }
            file.write_all(&chunk).await?;
            self.emit(DownloadEvent::Progress {
                key: key.clone(),
                downloaded,
                total,
            });
        }

        file.flush().await?;
        file.sync_all().await?;

        if downloaded == 0 {
            return Err(CacheError::InvalidContent {
                key: key.clone(),
                reason: "empty response body".to_string(),
            });
        }

        Ok(downloaded)
    }

    fn emit(&self, event: DownloadEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }
}

/// Content that could never fit the cache budget is refused outright
fn too_large(key: &ContentKey, size: u64, max: u64) -> CacheError {
    CacheError::InvalidContent {
        key: key.clone(),
        reason: format!(
            "content size {} exceeds cache capacity {}; oversized content is not cached",
            size, max
        ),
    }
}

async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial download"),
    }
}
