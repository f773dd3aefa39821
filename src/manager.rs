//! Cache manager facade
//!
//! `CacheManager` wires the index, the download coordinator and the decoder
//! pool into the API a video feed uses: get something playable for a URL,
//! warm the neighbours of the current item, drop content that went bad.
//!
//! There is no global instance. The application root creates one with
//! `init` and tears it down with `shutdown`; clones share the same state.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::disk::{DiskBackend, TokioFsBackend};
use crate::cache::{
    enforce_capacity, purge_expired, CacheError, CacheIndex, CacheResult, CacheStats, ContentKey,
    EvictionReport,
};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::download::{DownloadCoordinator, DownloadEvent, DownloadSettings, Transport};
use crate::pool::{DecoderFactory, ResourceHandle, ResourcePool, SourceLocator};

#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    index: Arc<CacheIndex>,
    coordinator: DownloadCoordinator,
    pool: ResourcePool,
    background: CancellationToken,
    purge_task: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl CacheManager {
    /// Initialize with the system clock
    pub async fn init(
        config: Config,
        transport: Arc<dyn Transport>,
        factory: Arc<dyn DecoderFactory>,
    ) -> CacheResult<Self> {
        Self::init_with_clock(config, transport, factory, Arc::new(SystemClock)).await
    }

    /// Bring the cache directory into a consistent state and start background work
    ///
    /// Creates the directory, loads and repairs the index, purges expired
    /// entries, enforces capacity, persists, then spawns the periodic purge.
    /// With caching disabled nothing on disk is touched.
    pub async fn init_with_clock(
        config: Config,
        transport: Arc<dyn Transport>,
        factory: Arc<dyn DecoderFactory>,
        clock: Arc<dyn Clock>,
    ) -> CacheResult<Self> {
        config.validate().map_err(CacheError::Config)?;

        let cache_dir = config.cache.cache_dir_path();
        let max_bytes = config.cache.max_cache_bytes;
        let backend: Arc<dyn DiskBackend> = Arc::new(TokioFsBackend::new());

        let index = if config.cache.enabled {
            backend.create_dir_all(&cache_dir).await?;
            let index = CacheIndex::load(&cache_dir, max_bytes, backend, clock.clone()).await;
            index.validate_and_repair().await?;
            purge_expired(&index, index.now()).await;
            enforce_capacity(&index, max_bytes).await;
            index.persist_logged().await;
            index
        } else {
            tracing::info!("Caching disabled, all playback uses the network");
            CacheIndex::new(&cache_dir, max_bytes, backend, clock.clone())
        };
        let index = Arc::new(index);

        let coordinator = DownloadCoordinator::new(
            index.clone(),
            transport,
            DownloadSettings::from_config(&config),
        );
        let pool = ResourcePool::new(config.pool.max_handles, factory, clock);

        let manager = Self {
            inner: Arc::new(Inner {
                config,
                index,
                coordinator,
                pool,
                background: CancellationToken::new(),
                purge_task: Mutex::new(None),
                shut_down: AtomicBool::new(false),
            }),
        };
        manager.spawn_purge_task();

        tracing::info!(
            cache_dir = %cache_dir.display(),
            entries = manager.inner.index.entry_count(),
            total_bytes = manager.inner.index.total_size(),
            max_bytes,
            max_handles = manager.inner.pool.max_handles(),
            "Cache manager initialized"
        );

        Ok(manager)
    }

    fn spawn_purge_task(&self) {
        if !self.inner.config.cache.enabled {
            return;
        }
        let Some(period) = self.inner.config.cache.purge_interval() else {
            return;
        };

        let index = self.inner.index.clone();
        let token = self.inner.background.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let report = purge_expired(&index, index.now()).await;
                        tracing::debug!(removed = report.removed, "Periodic expiry purge");
                    }
                }
            }
        });
        *self.inner.purge_task.lock() = Some(task);
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn index(&self) -> &Arc<CacheIndex> {
        &self.inner.index
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.inner.pool
    }

    pub fn coordinator(&self) -> &DownloadCoordinator {
        &self.inner.coordinator
    }

    fn caching_enabled(&self) -> bool {
        self.inner.config.cache.enabled
    }

    fn ensure_running(&self) -> CacheResult<()> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(CacheError::ShutDown);
        }
        Ok(())
    }

    /// A ready decoder handle for `url`
    ///
    /// Prefers a live handle, then a cached file. On a miss it either waits
    /// for the download or, with `playback.stream_while_downloading`, plays
    /// from the network while the download runs in the background.
    ///
    /// A live handle reading a local file is only reused while the index
    /// still holds that file. Once the entry is evicted or expires the
    /// handle is disposed and the source is resolved again.
    pub async fn get_playable_handle(&self, url: &str) -> CacheResult<Arc<ResourceHandle>> {
        self.ensure_running()?;
        let key = ContentKey::from_url(url);

        if let Some(handle) = self.inner.pool.get(&key) {
            if self.source_still_valid(&key, handle.source()).await {
                return Ok(handle);
            }
            tracing::debug!(key = %key.short(), "Cached file behind live handle is gone, rebinding");
            self.inner.pool.invalidate(&key);
        }

        let source = self.resolve_source(url, &key).await?;
        tracing::debug!(key = %key.short(), local = source.is_local(), "Acquiring decoder handle");
        self.inner.pool.acquire(&key, source).await
    }

    /// Network sources never go stale; a file must still be the indexed one
    async fn source_still_valid(&self, key: &ContentKey, source: &SourceLocator) -> bool {
        match source {
            SourceLocator::Network(_) => true,
            SourceLocator::File(path) => self
                .inner
                .index
                .lookup(key)
                .await
                .map(|entry| &entry.file_path == path)
                .unwrap_or(false),
        }
    }

    async fn resolve_source(&self, url: &str, key: &ContentKey) -> CacheResult<SourceLocator> {
        if !self.caching_enabled() {
            return Ok(SourceLocator::Network(url.to_string()));
        }

        if let Some(entry) = self.inner.index.lookup(key).await {
            return Ok(SourceLocator::File(entry.file_path));
        }

        let waiter = self.inner.coordinator.start_fetch(url)?;
        if self.inner.config.playback.stream_while_downloading {
            return Ok(SourceLocator::Network(url.to_string()));
        }
        waiter.wait().await.map(SourceLocator::File)
    }

    /// Local path for `url`, downloading on a miss
    pub async fn fetch(&self, url: &str) -> CacheResult<PathBuf> {
        self.ensure_running()?;
        if !self.caching_enabled() {
            return Err(CacheError::Config("caching is disabled".to_string()));
        }
        self.inner.coordinator.fetch(url).await
    }

    /// Whether a valid local file exists for `url`. Counts as a lookup.
    pub async fn is_cached(&self, url: &str) -> bool {
        if !self.caching_enabled() || self.ensure_running().is_err() {
            return false;
        }
        self.inner
            .index
            .lookup(&ContentKey::from_url(url))
            .await
            .is_some()
    }

    /// Start background downloads for `urls`; returns how many were started or joined
    pub fn preload<I, S>(&self, urls: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !self.caching_enabled() || self.ensure_running().is_err() {
            return 0;
        }
        self.inner.coordinator.preload(urls).len()
    }

    /// Preload the feed neighbours of `urls[current]`
    ///
    /// Covers `max_preload_behind` items before and `max_preload_ahead`
    /// after, clamped to the list, never `current` itself.
    pub fn preload_window<S: AsRef<str>>(&self, urls: &[S], current: usize) -> usize {
        if current >= urls.len() {
            return 0;
        }
        let preload = self.inner.config.preload;
        let start = current.saturating_sub(preload.max_preload_behind);
        let end = current
            .saturating_add(preload.max_preload_ahead)
            .min(urls.len() - 1);

        let window: Vec<&str> = (start..=end)
            .filter(|&i| i != current)
            .map(|i| urls[i].as_ref())
            .collect();
        self.preload(window)
    }

    /// Drop everything held for `url`: handle, in-flight download and cached file
    pub async fn invalidate(&self, url: &str) -> CacheResult<bool> {
        self.ensure_running()?;
        let key = ContentKey::from_url(url);

        let disposed = self.inner.pool.invalidate(&key);
        let cancelled = match self.inner.coordinator.cancel(&key) {
            Some(waiter) => {
                // Wait for cleanup so the transfer cannot insert after removal
                let _ = waiter.wait().await;
                true
            }
            None => false,
        };
        let removed = self.inner.index.remove(&key).await.is_some();

        tracing::info!(key = %key.short(), disposed, cancelled, removed, "Invalidated");
        Ok(disposed || cancelled || removed)
    }

    /// Cancel the in-flight download for `url`
    pub fn cancel(&self, url: &str) -> bool {
        self.inner
            .coordinator
            .cancel(&ContentKey::from_url(url))
            .is_some()
    }

    pub async fn purge_expired(&self) -> CacheResult<EvictionReport> {
        self.ensure_running()?;
        let index = &self.inner.index;
        Ok(purge_expired(index, index.now()).await)
    }

    /// Dispose every handle and remove every cached file
    pub async fn clear(&self) -> CacheResult<usize> {
        self.ensure_running()?;
        self.inner.pool.clear();
        Ok(self.inner.index.clear().await)
    }

    /// Write the index snapshot, reporting failure
    pub async fn flush(&self) -> CacheResult<()> {
        if !self.caching_enabled() {
            return Ok(());
        }
        self.inner.index.persist().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.inner.coordinator.subscribe()
    }

    pub fn stats(&self) -> CacheStats {
        let index = &self.inner.index;
        let tracker = index.stats();
        CacheStats {
            file_count: index.entry_count() as u64,
            total_bytes: index.total_size(),
            expired_count: index.expired_count(index.now()) as u64,
            cache_directory: index.cache_dir().to_path_buf(),
            max_bytes: index.max_bytes(),
            hits: tracker.hits(),
            misses: tracker.misses(),
            evictions: tracker.evictions(),
            live_handles: self.inner.pool.len() as u64,
            in_flight_downloads: self.inner.coordinator.in_flight_count() as u64,
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Stop background work, cancel downloads, dispose handles and flush the index
    ///
    /// Idempotent. Every other call returns `ShutDown` afterwards.
    pub async fn shutdown(&self) -> CacheResult<()> {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.inner.background.cancel();
        let task = self.inner.purge_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        self.inner.coordinator.shutdown().await;
        let disposed = self.inner.pool.clear();
        let flushed = self.flush().await;

        tracing::info!(disposed_handles = disposed, "Cache manager shut down");
        flushed
    }
}
