//! Bounded pool of decoder handles
//!
//! Player decoders are expensive, so at most `max_handles` live at once. The
//! pool hands out shared `ResourceHandle`s keyed by content key and disposes
//! the least recently used one when a new key needs room.
//!
//! Handles are registered before their decoder finishes initializing, so
//! concurrent acquirers of one key share a single initialization. A failed
//! initialization unregisters and disposes the handle; no acquirer ever sees
//! a half-built handle.
//!
//! Eviction prefers handles whose initialization has finished. A pending
//! handle is only evicted when every handle in the pool is pending, and its
//! acquirers then get `HandleInitFailed` instead of a disposed handle.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::cache::{CacheError, CacheResult, ContentKey};
use crate::clock::Clock;

/// Where a decoder reads its media from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    /// A fully cached local file
    File(PathBuf),
    /// The remote URL, for playback that does not wait for the cache
    Network(String),
}

impl SourceLocator {
    pub fn is_local(&self) -> bool {
        matches!(self, SourceLocator::File(_))
    }
}

/// Player-side decoder bound to one source
#[async_trait]
pub trait Decoder: Send + Sync {
    /// Prepare the decoder for playback
    async fn initialize(&self) -> Result<(), String>;

    /// Release every resource held by the decoder. Called at most once.
    fn dispose(&self);
}

/// Creates decoders for the pool
pub trait DecoderFactory: Send + Sync {
    fn create(&self, key: &ContentKey, source: &SourceLocator) -> Arc<dyn Decoder>;
}

/// Decoder that does nothing, for tools that never play video
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDecoder;

#[async_trait]
impl Decoder for NullDecoder {
    async fn initialize(&self) -> Result<(), String> {
        Ok(())
    }

    fn dispose(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullDecoderFactory;

impl DecoderFactory for NullDecoderFactory {
    fn create(&self, _key: &ContentKey, _source: &SourceLocator) -> Arc<dyn Decoder> {
        Arc::new(NullDecoder)
    }
}

/// A pooled decoder
pub struct ResourceHandle {
    key: ContentKey,
    source: SourceLocator,
    decoder: Arc<dyn Decoder>,
    last_access_time: AtomicU64,
    disposed: AtomicBool,
    init: OnceCell<CacheResult<()>>,
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("key", &self.key)
            .field("source", &self.source)
            .field("last_access_time", &self.last_access_time())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl ResourceHandle {
    fn new(key: ContentKey, source: SourceLocator, decoder: Arc<dyn Decoder>, now: u64) -> Self {
        Self {
            key,
            source,
            decoder,
            last_access_time: AtomicU64::new(now),
            disposed: AtomicBool::new(false),
            init: OnceCell::new(),
        }
    }

    pub fn key(&self) -> &ContentKey {
        &self.key
    }

    pub fn source(&self) -> &SourceLocator {
        &self.source
    }

    pub fn decoder(&self) -> &Arc<dyn Decoder> {
        &self.decoder
    }

    /// Last time the pool handed this handle out, in clock milliseconds
    pub fn last_access_time(&self) -> u64 {
        self.last_access_time.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Initialized successfully and not disposed
    pub fn is_ready(&self) -> bool {
        !self.is_disposed() && matches!(self.init.get(), Some(Ok(())))
    }

    fn is_pending(&self) -> bool {
        self.init.get().is_none()
    }

    fn touch(&self, now: u64) {
        self.last_access_time.fetch_max(now, Ordering::SeqCst);
    }

    fn failed(&self, reason: impl Into<String>) -> CacheError {
        CacheError::HandleInitFailed {
            key: self.key.clone(),
            reason: reason.into(),
        }
    }

    async fn ensure_initialized(&self) -> CacheResult<()> {
        self.init
            .get_or_init(|| async {
                if self.is_disposed() {
                    return Err(self.failed("handle was disposed before initialization"));
                }
                self.decoder.initialize().await.map_err(|reason| self.failed(reason))
            })
            .await
            .clone()
    }

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.decoder.dispose();
        }
    }
}

/// LRU pool of decoder handles
///
/// Recency lives in the `LruCache` order: `acquire` and `get` promote, while
/// `contains` and the initialization checks only peek.
pub struct ResourcePool {
    max_handles: usize,
    handles: Mutex<LruCache<ContentKey, Arc<ResourceHandle>>>,
    factory: Arc<dyn DecoderFactory>,
    clock: Arc<dyn Clock>,
}

impl ResourcePool {
    pub fn new(max_handles: usize, factory: Arc<dyn DecoderFactory>, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_handles: max_handles.max(1),
            // Capacity is enforced in `acquire` so pending handles can be skipped
            handles: Mutex::new(LruCache::unbounded()),
            factory,
            clock,
        }
    }

    pub fn max_handles(&self) -> usize {
        self.max_handles
    }

    /// Return the live handle for `key`, creating one from `source` if needed
    ///
    /// An existing handle is returned as-is even if `source` differs; call
    /// `invalidate` first to rebind a key. A handle that is evicted or
    /// invalidated before its initialization completes is reported as
    /// `HandleInitFailed`, never returned.
    pub async fn acquire(
        &self,
        key: &ContentKey,
        source: SourceLocator,
    ) -> CacheResult<Arc<ResourceHandle>> {
        let now = self.clock.now_millis();

        let handle = {
            let mut handles = self.handles.lock();
            match handles.get(key).cloned() {
                Some(existing) => {
                    existing.touch(now);
                    existing
                }
                None => {
                    while handles.len() >= self.max_handles {
                        let Some(evicted) = Self::pop_victim(&mut handles) else {
                            break;
                        };
                        tracing::debug!(
                            key = %evicted.key.short(),
                            pending = evicted.is_pending(),
                            "Disposing least recently used decoder handle"
                        );
                        evicted.dispose();
                    }

                    let decoder = self.factory.create(key, &source);
                    let created = Arc::new(ResourceHandle::new(key.clone(), source, decoder, now));
                    handles.put(key.clone(), created.clone());
                    created
                }
            }
        };

        let result = match handle.ensure_initialized().await {
            Ok(()) if handle.is_disposed() || !self.is_registered(&handle) => {
                Err(handle.failed("handle was evicted before initialization completed"))
            }
            other => other,
        };

        match result {
            Ok(()) => Ok(handle),
            Err(e) => {
                self.remove_if_current(&handle);
                handle.dispose();
                tracing::warn!(key = %key.short(), error = %e, "Decoder initialization failed");
                Err(e)
            }
        }
    }

    /// Fast path: the ready handle for `key`, touched
    pub fn get(&self, key: &ContentKey) -> Option<Arc<ResourceHandle>> {
        let mut handles = self.handles.lock();
        if !handles.peek(key).map(|h| h.is_ready()).unwrap_or(false) {
            return None;
        }
        let handle = handles.get(key)?;
        handle.touch(self.clock.now_millis());
        Some(handle.clone())
    }

    /// Dispose and unregister the handle for `key`
    pub fn invalidate(&self, key: &ContentKey) -> bool {
        let removed = self.handles.lock().pop(key);
        match removed {
            Some(handle) => {
                handle.dispose();
                true
            }
            None => false,
        }
    }

    /// Dispose every handle
    pub fn clear(&self) -> usize {
        let drained: Vec<_> = {
            let mut handles = self.handles.lock();
            std::iter::from_fn(|| handles.pop_lru()).map(|(_, h)| h).collect()
        };
        for handle in &drained {
            handle.dispose();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    pub fn contains(&self, key: &ContentKey) -> bool {
        self.handles.lock().contains(key)
    }

    /// Registered keys, most recently used first
    pub fn keys(&self) -> Vec<ContentKey> {
        self.handles.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Remove the least recently used handle that has finished initializing,
    /// or the least recently used one overall if every handle is pending
    fn pop_victim(
        handles: &mut LruCache<ContentKey, Arc<ResourceHandle>>,
    ) -> Option<Arc<ResourceHandle>> {
        let settled = handles
            .iter()
            .rev()
            .find(|(_, h)| !h.is_pending())
            .map(|(k, _)| k.clone());

        match settled {
            Some(key) => handles.pop(&key),
            None => handles.pop_lru().map(|(_, h)| h),
        }
    }

    fn is_registered(&self, handle: &Arc<ResourceHandle>) -> bool {
        self.handles
            .lock()
            .peek(&handle.key)
            .map(|current| Arc::ptr_eq(current, handle))
            .unwrap_or(false)
    }

    fn remove_if_current(&self, handle: &Arc<ResourceHandle>) {
        let mut handles = self.handles.lock();
        if handles
            .peek(&handle.key)
            .map(|current| Arc::ptr_eq(current, handle))
            .unwrap_or(false)
        {
            handles.pop(&handle.key);
        }
    }
}
