// Configuration file loading feeding a real manager

use std::io::Write;
use std::sync::Arc;

use reelcache::cache::CacheError;
use reelcache::config::{Config, LogFormat};
use reelcache::pool::NullDecoderFactory;
use reelcache::CacheManager;
use rstest::rstest;
use tempfile::{NamedTempFile, TempDir};
use tokio_test::assert_ok;

use super::support::{test_config, FakeOrigin};

fn write_config(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[tokio::test]
async fn test_config_file_with_env_cache_dir_initializes_manager() {
    let dir = TempDir::new().unwrap();
    std::env::set_var("REELCACHE_IT_CACHE_DIR", dir.path().join("feed"));
    let file = write_config(
        r#"
cache:
  cache_dir: ${REELCACHE_IT_CACHE_DIR}
  max_cache_bytes: 2048
pool:
  max_handles: 1
logging:
  format: pretty
"#,
    );

    let config = Config::from_file(file.path()).unwrap();
    std::env::remove_var("REELCACHE_IT_CACHE_DIR");
    assert_eq!(config.logging.format, LogFormat::Pretty);

    let manager = assert_ok!(
        CacheManager::init(config, Arc::new(FakeOrigin::new()), Arc::new(NullDecoderFactory)).await
    );

    assert!(dir.path().join("feed").is_dir(), "cache directory is created");
    assert_eq!(manager.stats().max_bytes, 2048);
    assert_eq!(manager.pool().max_handles(), 1);
    assert_ok!(manager.shutdown().await);
}

#[test]
fn test_missing_env_var_is_reported() {
    let file = write_config("cache:\n  cache_dir: ${REELCACHE_IT_UNSET_VAR}\n");

    let err = Config::from_file(file.path()).unwrap_err();
    assert!(err.contains("REELCACHE_IT_UNSET_VAR"));
}

#[rstest]
#[case::zero_budget(|c: &mut Config| c.cache.max_cache_bytes = 0)]
#[case::zero_duration(|c: &mut Config| c.cache.cache_duration_seconds = 0)]
#[case::empty_dir(|c: &mut Config| c.cache.cache_dir = String::new())]
#[case::no_handles(|c: &mut Config| c.pool.max_handles = 0)]
#[case::zero_timeout(|c: &mut Config| c.download.timeout_seconds = 0)]
#[tokio::test]
async fn test_invalid_config_is_rejected_at_init(#[case] break_config: fn(&mut Config)) {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path(), 10_000);
    break_config(&mut config);

    let result =
        CacheManager::init(config, Arc::new(FakeOrigin::new()), Arc::new(NullDecoderFactory)).await;

    assert!(matches!(result, Err(CacheError::Config(_))));
}
