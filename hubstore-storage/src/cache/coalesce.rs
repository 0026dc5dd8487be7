//! Request coalescing (singleflight) for cold cache lookups.
//!
//! When many tasks miss the cache for the same key at once, only the first
//! ("leader") starts a resolution; the others ("joiners") wait for it and
//! receive a clone of the same result, success or failure.
//!
//! Design:
//! - A single `Mutex<HashMap>` guards the in-flight map. It is only held to
//!   look up or insert a slot, never across an `.await`.
//! - Each slot is a `watch` channel that starts empty and is filled exactly
//!   once with the resolution result.
//! - The resolution runs as a spawned task, so a caller that stops waiting
//!   cannot cancel it.
//! - The slot is removed from the map before its result is published, so a
//!   caller woken by the result never finds the finished slot again. The next
//!   cold lookup starts a fresh resolution.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use hubstore_core::{HubResult, StorageError};
use tokio::sync::watch;

type Slot<V> = watch::Receiver<Option<HubResult<V>>>;
type InflightMap<K, V> = Arc<Mutex<HashMap<K, Slot<V>>>>;

/// Snapshot of coalescing metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoalesceMetrics {
    /// Number of resolutions started (one per leader).
    pub leader_count: u64,
    /// Number of callers that joined an in-flight resolution.
    pub joined_count: u64,
    /// Number of resolutions that ended in an error.
    pub failed_count: u64,
}

#[derive(Debug, Default)]
struct Counters {
    leader: AtomicU64,
    joined: AtomicU64,
    failed: AtomicU64,
}

/// Owns the sending half of a slot. Removes the slot from the in-flight map
/// before the result is published, or before waiters are woken by a panic.
struct SlotGuard<K: Eq + Hash, V> {
    key: Option<K>,
    inflight: InflightMap<K, V>,
    tx: watch::Sender<Option<HubResult<V>>>,
}

impl<K: Eq + Hash, V> SlotGuard<K, V> {
    fn release(&mut self) {
        if let Some(key) = self.key.take() {
            let mut map = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            map.remove(&key);
        }
    }

    fn publish(mut self, result: HubResult<V>) {
        self.release();
        self.tx.send_replace(Some(result));
    }
}

impl<K: Eq + Hash, V> Drop for SlotGuard<K, V> {
    fn drop(&mut self) {
        // `tx` is dropped after this, so waiters see the slot gone first.
        self.release();
    }
}

/// Per-key singleflight.
pub struct Coalescer<K, V> {
    inflight: InflightMap<K, V>,
    counters: Arc<Counters>,
}

impl<K, V> Default for Coalescer<K, V> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
        }
    }
}

impl<K, V> Coalescer<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `key`, sharing one in-flight resolution among concurrent callers.
    ///
    /// `resolve` is only called when this caller becomes the leader. The
    /// future it returns must install its result wherever later lookups will
    /// find it before completing, since the slot disappears right after.
    pub async fn run<F, Fut>(&self, key: K, resolve: F) -> HubResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = HubResult<V>> + Send + 'static,
    {
        let mut slot = self.join_or_lead(&key, resolve)?;

        let aborted = || -> HubResult<V> {
            Err(StorageError::ScanAborted {
                key: format!("{:?}", key),
            }
            .into())
        };

        let outcome = match slot.wait_for(Option::is_some).await {
            Ok(value) => match &*value {
                Some(result) => result.clone(),
                None => aborted(),
            },
            // Sender dropped without a value: the resolution task panicked.
            Err(_) => aborted(),
        };
        outcome
    }

    fn join_or_lead<F, Fut>(&self, key: &K, resolve: F) -> HubResult<Slot<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = HubResult<V>> + Send + 'static,
    {
        let mut inflight = self
            .inflight
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;

        if let Some(slot) = inflight.get(key) {
            self.counters.joined.fetch_add(1, Ordering::Relaxed);
            return Ok(slot.clone());
        }

        let (tx, rx) = watch::channel(None);
        inflight.insert(key.clone(), rx.clone());
        self.counters.leader.fetch_add(1, Ordering::Relaxed);

        let fut = resolve();
        let guard = SlotGuard {
            key: Some(key.clone()),
            inflight: Arc::clone(&self.inflight),
            tx,
        };
        let counters = Arc::clone(&self.counters);
        tokio::spawn(async move {
            let result = fut.await;
            if result.is_err() {
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            // Joiners already hold a receiver; only new lookups miss the slot.
            guard.publish(result);
        });

        Ok(rx)
    }

    /// Number of resolutions currently in flight.
    pub fn inflight_count(&self) -> usize {
        self.inflight.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Snapshot of the metrics.
    pub fn metrics(&self) -> CoalesceMetrics {
        CoalesceMetrics {
            leader_count: self.counters.leader.load(Ordering::Relaxed),
            joined_count: self.counters.joined.load(Ordering::Relaxed),
            failed_count: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

impl<K, V> Debug for Coalescer<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coalescer")
            .field("leader_count", &self.counters.leader.load(Ordering::Relaxed))
            .field("joined_count", &self.counters.joined.load(Ordering::Relaxed))
            .finish()
    }
}
