// Request Coalescing Module
//
// Deduplicates concurrent downloads of the same content key.
// When several callers ask for the same video at once:
// - First caller (leader): owns the transfer and publishes its outcome
// - Later callers (followers): attach to the in-flight slot and await the outcome
// - All callers: receive the same `Result<PathBuf, CacheError>` (true deduplication)
//
// The in-flight slot is removed before the outcome is published, so a caller
// arriving after completion sees the index, never a finished slot.

use crate::cache::{CacheError, CacheResult, ContentKey};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Outcome shared with every waiter of one transfer
pub type FetchOutcome = CacheResult<PathBuf>;

/// Request coalescing manager
/// Tracks in-flight downloads and deduplicates concurrent requests for the same key
#[derive(Debug, Clone, Default)]
pub struct RequestCoalescer {
    in_flight: Arc<Mutex<HashMap<ContentKey, InFlight>>>,
    next_id: Arc<AtomicU64>,
}

#[derive(Debug)]
struct InFlight {
    id: u64,
    sender: watch::Sender<Option<FetchOutcome>>,
    cancel: CancellationToken,
}

impl RequestCoalescer {
    /// Create a new request coalescer
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a coalescing slot for `key`
    ///
    /// Returns `CoalescingSlot::Leader` if nothing is in flight for the key.
    /// The leader's cancellation token is a child of `parent`.
    ///
    /// Returns `CoalescingSlot::Follower` with a waiter on the existing transfer.
    pub fn acquire(&self, key: &ContentKey, parent: &CancellationToken) -> CoalescingSlot {
        let mut in_flight = self.in_flight.lock();

        if let Some(existing) = in_flight.get(key) {
            return CoalescingSlot::Follower(Waiter {
                key: key.clone(),
                receiver: existing.sender.subscribe(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, _rx) = watch::channel(None);
        let cancel = parent.child_token();
        in_flight.insert(
            key.clone(),
            InFlight {
                id,
                sender: sender.clone(),
                cancel: cancel.clone(),
            },
        );

        CoalescingSlot::Leader(LeaderGuard {
            key: key.clone(),
            id,
            coalescer: self.clone(),
            sender,
            cancel,
            completed: false,
        })
    }

    /// Signal cancellation to the transfer for `key`
    ///
    /// Returns a waiter on that transfer, or `None` if nothing was in flight.
    pub fn cancel(&self, key: &ContentKey) -> Option<Waiter> {
        let in_flight = self.in_flight.lock();
        let slot = in_flight.get(key)?;
        slot.cancel.cancel();
        Some(Waiter {
            key: key.clone(),
            receiver: slot.sender.subscribe(),
        })
    }

    /// Waiters on every transfer currently in flight
    pub fn waiters(&self) -> Vec<Waiter> {
        self.in_flight
            .lock()
            .iter()
            .map(|(key, slot)| Waiter {
                key: key.clone(),
                receiver: slot.sender.subscribe(),
            })
            .collect()
    }

    pub fn is_in_flight(&self, key: &ContentKey) -> bool {
        self.in_flight.lock().contains_key(key)
    }

    /// Get current number of in-flight downloads
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Remove the slot for `key` if it still belongs to transfer `id`
    fn remove_in_flight(&self, key: &ContentKey, id: u64) {
        let mut in_flight = self.in_flight.lock();
        if in_flight.get(key).map(|slot| slot.id) == Some(id) {
            in_flight.remove(key);
        }
    }
}

/// Result of acquiring a coalescing slot
#[derive(Debug)]
pub enum CoalescingSlot {
    /// Nothing was in flight - run the transfer and complete the guard.
    Leader(LeaderGuard),

    /// Another transfer is in flight - await its outcome.
    Follower(Waiter),
}

impl CoalescingSlot {
    pub fn is_leader(&self) -> bool {
        matches!(self, CoalescingSlot::Leader(_))
    }

    pub fn is_follower(&self) -> bool {
        matches!(self, CoalescingSlot::Follower(_))
    }
}

/// Handle for awaiting the outcome of an in-flight transfer
#[derive(Debug, Clone)]
pub struct Waiter {
    key: ContentKey,
    receiver: watch::Receiver<Option<FetchOutcome>>,
}

impl Waiter {
    pub fn key(&self) -> &ContentKey {
        &self.key
    }

    /// Wait for the transfer to finish
    ///
    /// A leader that disappears without publishing counts as cancelled.
    pub async fn wait(mut self) -> FetchOutcome {
        let cancelled = || CacheError::Cancelled {
            key: self.key.clone(),
        };
        match self.receiver.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or_else(|| Err(cancelled())),
            Err(_) => Err(cancelled()),
        }
    }
}

/// Guard held by the transfer that owns a key
/// Dropping it without `complete` publishes `Cancelled` to all waiters
#[derive(Debug)]
pub struct LeaderGuard {
    key: ContentKey,
    id: u64,
    coalescer: RequestCoalescer,
    sender: watch::Sender<Option<FetchOutcome>>,
    cancel: CancellationToken,
    completed: bool,
}

impl LeaderGuard {
    pub fn key(&self) -> &ContentKey {
        &self.key
    }

    /// Token cancelled by `RequestCoalescer::cancel` or the parent token
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Waiter on this guard's own outcome
    pub fn subscribe(&self) -> Waiter {
        Waiter {
            key: self.key.clone(),
            receiver: self.sender.subscribe(),
        }
    }

    /// Leave the in-flight set, then publish `outcome` to every waiter
    pub fn complete(mut self, outcome: FetchOutcome) {
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: FetchOutcome) {
        if self.completed {
            return;
        }
        self.completed = true;
        self.coalescer.remove_in_flight(&self.key, self.id);
        self.sender.send_replace(Some(outcome));
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        let outcome = Err(CacheError::Cancelled {
            key: self.key.clone(),
        });
        self.finish(outcome);
    }
}
