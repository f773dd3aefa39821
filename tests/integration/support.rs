// Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use reelcache::cache::{CacheError, CacheResult, ContentKey};
use reelcache::clock::ManualClock;
use reelcache::config::Config;
use reelcache::download::{DownloadEvent, Transport, TransportResponse};
use reelcache::pool::{Decoder, DecoderFactory, SourceLocator};
use reelcache::CacheManager;
use tempfile::TempDir;
use tokio::sync::broadcast;

pub const START: u64 = 1_700_000_000_000;

/// Serves a fixed body per URL, counting every open
#[derive(Default)]
pub struct FakeOrigin {
    bodies: Mutex<HashMap<String, Bytes>>,
    failing: Mutex<HashSet<String>>,
    chunk_delay: Duration,
    opens: AtomicUsize,
}

impl FakeOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bodies are delivered in four chunks, each delayed by `delay`
    pub fn with_chunk_delay(delay: Duration) -> Self {
        Self {
            chunk_delay: delay,
            ..Self::default()
        }
    }

    pub fn serve(&self, url: &str, size: usize) {
        self.bodies
            .lock()
            .insert(url.to_string(), Bytes::from(vec![b'v'; size]));
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().insert(url.to_string());
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeOrigin {
    async fn open(&self, url: &str) -> CacheResult<TransportResponse> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().contains(url) {
            return Err(CacheError::TransferFailed {
                url: url.to_string(),
                reason: "HTTP status 503 Service Unavailable".to_string(),
            });
        }
        let body = self
            .bodies
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| CacheError::TransferFailed {
                url: url.to_string(),
                reason: "HTTP status 404 Not Found".to_string(),
            })?;

        let chunk_len = (body.len() / 4).max(1);
        let chunks: Vec<Bytes> = body.chunks(chunk_len).map(Bytes::copy_from_slice).collect();
        let delay = self.chunk_delay;
        let stream = futures::stream::iter(chunks)
            .then(move |chunk| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok::<_, CacheError>(chunk)
            })
            .boxed();

        Ok(TransportResponse {
            content_length: Some(body.len() as u64),
            body: stream,
        })
    }
}

/// Decoder that records its lifecycle
pub struct RecordingDecoder {
    disposed: AtomicUsize,
    fail_init: bool,
}

impl RecordingDecoder {
    pub fn dispose_count(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Decoder for RecordingDecoder {
    async fn initialize(&self) -> Result<(), String> {
        if self.fail_init {
            return Err("unsupported codec".to_string());
        }
        Ok(())
    }

    fn dispose(&self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory that keeps every decoder it created, with its source
#[derive(Default)]
pub struct RecordingFactory {
    created: Mutex<Vec<(ContentKey, SourceLocator, Arc<RecordingDecoder>)>>,
    fail_init: bool,
}

impl RecordingFactory {
    pub fn failing() -> Self {
        Self {
            fail_init: true,
            ..Self::default()
        }
    }

    pub fn created(&self) -> Vec<(ContentKey, SourceLocator, Arc<RecordingDecoder>)> {
        self.created.lock().clone()
    }

    pub fn decoder_for(&self, key: &ContentKey) -> Option<Arc<RecordingDecoder>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|(k, _, _)| k == key)
            .map(|(_, _, d)| d.clone())
    }
}

impl DecoderFactory for RecordingFactory {
    fn create(&self, key: &ContentKey, source: &SourceLocator) -> Arc<dyn Decoder> {
        let decoder = Arc::new(RecordingDecoder {
            disposed: AtomicUsize::new(0),
            fail_init: self.fail_init,
        });
        self.created
            .lock()
            .push((key.clone(), source.clone(), decoder.clone()));
        decoder
    }
}

/// Config pointing at `dir` with the given byte budget
pub fn test_config(dir: &Path, max_cache_bytes: u64) -> Config {
    let mut config = Config::default();
    config.cache.cache_dir = dir.to_string_lossy().into_owned();
    config.cache.max_cache_bytes = max_cache_bytes;
    config.cache.cache_duration_seconds = 3600;
    config.download.timeout_seconds = 5;
    config
}

pub struct Harness {
    pub dir: TempDir,
    pub origin: Arc<FakeOrigin>,
    pub factory: Arc<RecordingFactory>,
    pub clock: Arc<ManualClock>,
    pub manager: CacheManager,
}

impl Harness {
    pub async fn start(max_cache_bytes: u64) -> Self {
        Self::start_with(max_cache_bytes, FakeOrigin::new(), |_| {}).await
    }

    pub async fn start_with(
        max_cache_bytes: u64,
        origin: FakeOrigin,
        tweak: impl FnOnce(&mut Config),
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path(), max_cache_bytes);
        tweak(&mut config);
        let origin = Arc::new(origin);
        let factory = Arc::new(RecordingFactory::default());
        let clock = Arc::new(ManualClock::new(START));
        let manager = CacheManager::init_with_clock(
            config,
            origin.clone(),
            factory.clone(),
            clock.clone(),
        )
        .await
        .unwrap();
        Self {
            dir,
            origin,
            factory,
            clock,
            manager,
        }
    }

    /// Start a second manager over the same directory and origin
    pub async fn restart(&self) -> CacheManager {
        let config = self.manager.config().clone();
        CacheManager::init_with_clock(
            config,
            self.origin.clone(),
            self.factory.clone(),
            self.clock.clone(),
        )
        .await
        .unwrap()
    }
}

pub fn url(name: &str) -> String {
    format!("https://cdn.example.com/feed/{}.mp4", name)
}

/// Wait for `count` terminal download events
pub async fn wait_for_terminal_events(
    events: &mut broadcast::Receiver<DownloadEvent>,
    count: usize,
) -> Vec<DownloadEvent> {
    let mut terminal = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while terminal.len() < count {
            match events.recv().await {
                Ok(event) if event.is_terminal() => terminal.push(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
    .await
    .expect("timed out waiting for download events");
    terminal
}

/// Files in the cache directory other than the index snapshot
pub fn content_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name != "index.json")
        .collect();
    names.sort();
    names
}
