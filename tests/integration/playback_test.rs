// Playable handle resolution and decoder pool behaviour through the manager

use std::sync::Arc;
use std::time::Duration;

use reelcache::cache::{CacheError, ContentKey};
use reelcache::clock::ManualClock;
use reelcache::pool::SourceLocator;
use reelcache::CacheManager;
use tempfile::TempDir;
use tokio_test::assert_ok;

use super::support::{
    content_files, test_config, url, wait_for_terminal_events, FakeOrigin, Harness,
    RecordingFactory, START,
};

#[tokio::test]
async fn test_cached_item_plays_from_local_file() {
    let h = Harness::start(10_000).await;
    let a = url("a");
    h.origin.serve(&a, 300);
    let path = assert_ok!(h.manager.fetch(&a).await);

    let handle = assert_ok!(h.manager.get_playable_handle(&a).await);

    assert_eq!(handle.source(), &SourceLocator::File(path));
    assert!(handle.is_ready());
    assert_eq!(h.origin.opens(), 1);
}

#[tokio::test]
async fn test_miss_waits_for_download_by_default() {
    let h = Harness::start(10_000).await;
    let a = url("a");
    h.origin.serve(&a, 300);

    let handle = assert_ok!(h.manager.get_playable_handle(&a).await);

    match handle.source() {
        SourceLocator::File(path) => assert_eq!(std::fs::read(path).unwrap().len(), 300),
        other => panic!("expected a local file, got {:?}", other),
    }
    assert!(h.manager.index().contains(&ContentKey::from_url(&a)));
}

#[tokio::test]
async fn test_miss_streams_while_downloading_when_enabled() {
    let h = Harness::start_with(10_000, FakeOrigin::new(), |config| {
        config.playback.stream_while_downloading = true;
    })
    .await;
    let a = url("a");
    h.origin.serve(&a, 300);

    let mut events = h.manager.subscribe();
    let handle = assert_ok!(h.manager.get_playable_handle(&a).await);
    assert_eq!(handle.source(), &SourceLocator::Network(a.clone()));

    wait_for_terminal_events(&mut events, 1).await;
    assert!(h.manager.is_cached(&a).await, "download finishes in the background");
}

#[tokio::test]
async fn test_second_request_reuses_live_handle() {
    let h = Harness::start(10_000).await;
    let a = url("a");
    h.origin.serve(&a, 300);

    let first = assert_ok!(h.manager.get_playable_handle(&a).await);
    h.clock.advance(Duration::from_millis(10));
    let second = assert_ok!(h.manager.get_playable_handle(&a).await);

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.last_access_time(), START + 10);
    assert_eq!(h.factory.created().len(), 1);
}

#[tokio::test]
async fn test_pool_disposes_least_recently_used_handle() {
    let h = Harness::start_with(10_000, FakeOrigin::new(), |config| {
        config.pool.max_handles = 2;
    })
    .await;
    let (a, b, c) = (url("a"), url("b"), url("c"));
    for u in [&a, &b, &c] {
        h.origin.serve(u, 100);
    }

    let handle_a = assert_ok!(h.manager.get_playable_handle(&a).await);
    h.clock.advance(Duration::from_millis(10));
    assert_ok!(h.manager.get_playable_handle(&b).await);
    h.clock.advance(Duration::from_millis(10));
    assert_ok!(h.manager.get_playable_handle(&c).await);

    let pool = h.manager.pool();
    assert_eq!(pool.len(), 2);
    assert!(!pool.contains(&ContentKey::from_url(&a)));
    assert!(handle_a.is_disposed());
    let decoder_a = h.factory.decoder_for(&ContentKey::from_url(&a)).unwrap();
    assert_eq!(decoder_a.dispose_count(), 1);

    // Evicting a handle never touches the cached file
    assert!(h.manager.is_cached(&a).await);
    assert_eq!(h.manager.stats().live_handles, 2);
}

#[tokio::test]
async fn test_live_handle_is_rebound_after_its_file_is_evicted() {
    let h = Harness::start(1000).await;
    let (a, b, c) = (url("a"), url("b"), url("c"));
    for u in [&a, &b, &c] {
        h.origin.serve(u, 400);
    }

    let stale = assert_ok!(h.manager.get_playable_handle(&a).await);
    let SourceLocator::File(stale_path) = stale.source().clone() else {
        panic!("expected a local file, got {:?}", stale.source());
    };
    h.clock.advance(Duration::from_millis(10));
    assert_ok!(h.manager.fetch(&b).await);
    h.clock.advance(Duration::from_millis(10));
    assert_ok!(h.manager.fetch(&c).await);
    assert!(!stale_path.exists(), "a was evicted from the disk cache");
    assert!(h.manager.pool().contains(&ContentKey::from_url(&a)));

    let fresh = assert_ok!(h.manager.get_playable_handle(&a).await);

    assert!(!Arc::ptr_eq(&stale, &fresh));
    assert!(stale.is_disposed());
    assert!(fresh.is_ready());
    match fresh.source() {
        SourceLocator::File(path) => assert_eq!(std::fs::read(path).unwrap().len(), 400),
        other => panic!("expected a local file, got {:?}", other),
    }
    assert_eq!(h.origin.opens(), 4, "a is downloaded again");
}

#[tokio::test]
async fn test_invalidate_disposes_handle() {
    let h = Harness::start(10_000).await;
    let a = url("a");
    h.origin.serve(&a, 100);
    let handle = assert_ok!(h.manager.get_playable_handle(&a).await);

    assert!(assert_ok!(h.manager.invalidate(&a).await));

    assert!(handle.is_disposed());
    assert!(h.manager.pool().is_empty());
    assert!(content_files(h.dir.path()).is_empty());
}

#[tokio::test]
async fn test_failed_decoder_initialization_is_reported() {
    let dir = TempDir::new().unwrap();
    let origin = Arc::new(FakeOrigin::new());
    let a = url("a");
    origin.serve(&a, 100);
    let factory = Arc::new(RecordingFactory::failing());
    let manager = CacheManager::init_with_clock(
        test_config(dir.path(), 10_000),
        origin,
        factory.clone(),
        Arc::new(ManualClock::new(START)),
    )
    .await
    .unwrap();

    let err = manager.get_playable_handle(&a).await.unwrap_err();

    assert!(matches!(err, CacheError::HandleInitFailed { .. }));
    assert!(manager.pool().is_empty(), "failed handles are not kept");
    let decoder = factory.decoder_for(&ContentKey::from_url(&a)).unwrap();
    assert_eq!(decoder.dispose_count(), 1);
    assert!(manager.is_cached(&a).await, "the download itself succeeded");
}

#[tokio::test]
async fn test_download_failure_propagates_to_playback() {
    let h = Harness::start(10_000).await;
    let bad = url("bad");
    h.origin.fail(&bad);

    let err = h.manager.get_playable_handle(&bad).await.unwrap_err();

    assert!(matches!(err, CacheError::TransferFailed { .. }));
    assert!(h.factory.created().is_empty());
}

#[tokio::test]
async fn test_disabled_cache_always_plays_from_network() {
    let root = TempDir::new().unwrap();
    let cache_dir = root.path().join("never-created");
    let origin = Arc::new(FakeOrigin::new());
    let a = url("a");
    origin.serve(&a, 100);

    let mut config = test_config(&cache_dir, 10_000);
    config.cache.enabled = false;
    let manager = CacheManager::init_with_clock(
        config,
        origin.clone(),
        Arc::new(RecordingFactory::default()),
        Arc::new(ManualClock::new(START)),
    )
    .await
    .unwrap();

    let handle = assert_ok!(manager.get_playable_handle(&a).await);
    assert_eq!(handle.source(), &SourceLocator::Network(a.clone()));

    assert_eq!(manager.preload([&a]), 0);
    assert!(!manager.is_cached(&a).await);
    assert!(matches!(manager.fetch(&a).await, Err(CacheError::Config(_))));
    assert_eq!(origin.opens(), 0);

    assert_ok!(manager.shutdown().await);
    assert!(!cache_dir.exists());
}
