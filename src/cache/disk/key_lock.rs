//! Per-key critical sections
//!
//! Every index mutation for a key runs while holding that key's async mutex,
//! so a lookup racing an eviction of the same key observes either the state
//! before or after the eviction. Different keys never contend.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

use crate::cache::ContentKey;

/// Registry of per-key async mutexes, pruned when unused
#[derive(Default)]
pub(crate) struct KeyLocks {
    locks: Mutex<HashMap<ContentKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &ContentKey) -> KeyGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let guard = lock.lock_owned().await;
        KeyGuard {
            locks: self,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Number of keys with an outstanding or awaited guard
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Exclusive access to one key; released on drop
pub(crate) struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: ContentKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        // Release the mutex before deciding whether the entry is still referenced
        self.guard.take();
        let mut locks = self.locks.locks.lock();
        if let Some(lock) = locks.get(&self.key) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(&self.key);
            }
        }
    }
}
