//! Distributed refill protocol for the draw queues.
//!
//! At most one worker per device class refills at a time. The holder of the
//! lease lock copies the source list into the draw queue in one atomic step,
//! broadcasts the refill-done signal and releases the lock with a token check.
//! Everyone else waits, bounded, for that signal and then retries their pop.

use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::device::DeviceClass;
use crate::error::{Error, Result};
use crate::keys::KeySpace;
use crate::metrics::MetricsCollector;
use crate::policy::CacheTimeouts;
use crate::store::BackingStore;

pub const REFILL_DONE: &str = "done";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillOutcome {
    /// This caller held the lock and refilled the queue.
    Refilled { items: usize },
    /// The queue was already populated when checked.
    AlreadyFilled,
    /// Another worker's refill-done signal arrived.
    Signalled,
    /// No signal within the wait bound. The caller retries its pop anyway.
    TimedOut,
}

/// Random permutation of `items`, the order draws are served in.
pub fn shuffled(mut items: Vec<String>) -> Vec<String> {
    items.shuffle(&mut rand::thread_rng());
    items
}

pub struct RefillCoordinator {
    store: Arc<dyn BackingStore>,
    keys: KeySpace,
    timeouts: CacheTimeouts,
    metrics: Arc<MetricsCollector>,
}

impl RefillCoordinator {
    pub fn new(
        store: Arc<dyn BackingStore>,
        keys: KeySpace,
        timeouts: CacheTimeouts,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            keys,
            timeouts,
            metrics,
        }
    }

    /// Make sure the draw queue for `class` has been refilled, either by this
    /// caller or by whoever currently holds the refill lock.
    ///
    /// Store failures and [`Error::SourceEmpty`] are returned as-is. A wait
    /// that times out is not an error, see [`RefillOutcome::TimedOut`].
    pub async fn ensure_filled(&self, class: DeviceClass) -> Result<RefillOutcome> {
        let lock_key = self.keys.refill_lock(class);
        let token = Uuid::new_v4().to_string();

        let acquired = self
            .store
            .try_acquire_lock(&lock_key, &token, self.timeouts.lock_lease)
            .await?;

        if !acquired {
            return self.wait_for_refill(class).await;
        }

        debug!(device = %class, lock = %lock_key, "Acquired refill lock");
        let outcome = self.refill_as_holder(class).await;
        self.release(&lock_key, &token).await;
        outcome
    }

    async fn refill_as_holder(&self, class: DeviceClass) -> Result<RefillOutcome> {
        let queue = self.keys.draw_queue(class);

        // A previous holder may have refilled between our empty pop and the lock.
        if self.store.list_len(&queue).await? > 0 {
            debug!(device = %class, "Draw queue already refilled, skipping");
            return Ok(RefillOutcome::AlreadyFilled);
        }

        let items = self.refill_from_source(class).await?;

        let channel = self.keys.refill_channel(class);
        if let Err(e) = self.store.publish(&channel, REFILL_DONE).await {
            warn!(device = %class, error = %e, "Failed to broadcast refill completion");
        }

        Ok(RefillOutcome::Refilled { items })
    }

    /// Replace the draw queue with a shuffled snapshot of the source list.
    async fn refill_from_source(&self, class: DeviceClass) -> Result<usize> {
        let source = self.keys.source_list(class);
        let queue = self.keys.draw_queue(class);

        let snapshot = self.store.list_all(&source).await?;
        if snapshot.is_empty() {
            warn!(device = %class, source = %source, "Source list is empty, nothing to refill");
            return Err(Error::SourceEmpty(class));
        }

        let items = shuffled(snapshot);
        self.store.replace_list(&queue, &items).await?;
        self.metrics.record_refill();

        info!(device = %class, items = items.len(), "Refilled draw queue");
        Ok(items.len())
    }

    async fn wait_for_refill(&self, class: DeviceClass) -> Result<RefillOutcome> {
        let channel = self.keys.refill_channel(class);
        let mut subscription = self.store.subscribe(&channel).await?;

        // The holder may have finished before we subscribed.
        if self.store.list_len(&self.keys.draw_queue(class)).await? > 0 {
            self.metrics.record_refill_wait(false);
            return Ok(RefillOutcome::AlreadyFilled);
        }

        debug!(device = %class, "Waiting for refill by lock holder");
        let signal = subscription.recv(self.timeouts.refill_wait).await?;
        self.metrics.record_refill_wait(signal.is_none());

        match signal {
            Some(_) => Ok(RefillOutcome::Signalled),
            None => {
                warn!(
                    device = %class,
                    waited_ms = self.timeouts.refill_wait.as_millis() as u64,
                    "Timed out waiting for refill signal"
                );
                Ok(RefillOutcome::TimedOut)
            }
        }
    }

    /// Token-checked release. Failure is logged only: the lease expires anyway.
    async fn release(&self, lock_key: &str, token: &str) {
        match self.store.release_lock(lock_key, token).await {
            Ok(true) => debug!(lock = %lock_key, "Released refill lock"),
            Ok(false) => warn!(
                lock = %lock_key,
                "Refill lock expired before release, left to its current holder"
            ),
            Err(e) => warn!(lock = %lock_key, error = %e, "Failed to release refill lock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory_store::MemoryStore;
    use std::time::Duration;

    fn fast_timeouts() -> CacheTimeouts {
        CacheTimeouts {
            lock_lease: Duration::from_secs(5),
            refill_wait: Duration::from_millis(40),
            pop_wait: Duration::from_millis(40),
        }
    }

    fn coordinator(store: Arc<MemoryStore>) -> (RefillCoordinator, Arc<MetricsCollector>) {
        let metrics = Arc::new(MetricsCollector::new());
        let coordinator = RefillCoordinator::new(
            store,
            KeySpace::default(),
            fast_timeouts(),
            metrics.clone(),
        );
        (coordinator, metrics)
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_shuffled_is_a_permutation() {
        let mut out = shuffled(names(&["a", "b", "c", "d"]));
        out.sort();
        assert_eq!(out, names(&["a", "b", "c", "d"]));
    }

    #[tokio::test]
    async fn test_holder_refills_from_source_and_releases() {
        let store = Arc::new(MemoryStore::new());
        let keys = KeySpace::default();
        store
            .replace_list(&keys.source_list(DeviceClass::Pc), &names(&["a", "b"]))
            .await
            .unwrap();
        let (coordinator, metrics) = coordinator(store.clone());

        let outcome = coordinator.ensure_filled(DeviceClass::Pc).await.unwrap();
        assert_eq!(outcome, RefillOutcome::Refilled { items: 2 });

        let mut queue = store.list_all(&keys.draw_queue(DeviceClass::Pc)).await.unwrap();
        queue.sort();
        assert_eq!(queue, names(&["a", "b"]));
        assert_eq!(store.lock_holder(&keys.refill_lock(DeviceClass::Pc)).unwrap(), None);
        assert_eq!(metrics.snapshot().refills, 1);
    }

    #[tokio::test]
    async fn test_empty_source_is_reported_and_lock_released() {
        let store = Arc::new(MemoryStore::new());
        let (coordinator, _) = coordinator(store.clone());

        let err = coordinator.ensure_filled(DeviceClass::Mobile).await.unwrap_err();
        assert!(matches!(err, Error::SourceEmpty(DeviceClass::Mobile)));

        let lock = KeySpace::default().refill_lock(DeviceClass::Mobile);
        assert_eq!(store.lock_holder(&lock).unwrap(), None);
    }

    #[tokio::test]
    async fn test_holder_skips_refill_when_queue_populated() {
        let store = Arc::new(MemoryStore::new());
        let keys = KeySpace::default();
        store
            .replace_list(&keys.source_list(DeviceClass::Pc), &names(&["a", "b"]))
            .await
            .unwrap();
        store
            .replace_list(&keys.draw_queue(DeviceClass::Pc), &names(&["z"]))
            .await
            .unwrap();
        let (coordinator, metrics) = coordinator(store.clone());

        let outcome = coordinator.ensure_filled(DeviceClass::Pc).await.unwrap();
        assert_eq!(outcome, RefillOutcome::AlreadyFilled);
        assert_eq!(
            store.list_all(&keys.draw_queue(DeviceClass::Pc)).await.unwrap(),
            names(&["z"])
        );
        assert_eq!(metrics.snapshot().refills, 0);
    }

    #[tokio::test]
    async fn test_waiter_times_out_without_signal() {
        let store = Arc::new(MemoryStore::new());
        let lock = KeySpace::default().refill_lock(DeviceClass::Pc);
        store
            .try_acquire_lock(&lock, "someone-else", Duration::from_secs(5))
            .await
            .unwrap();
        let (coordinator, metrics) = coordinator(store.clone());

        let outcome = coordinator.ensure_filled(DeviceClass::Pc).await.unwrap();
        assert_eq!(outcome, RefillOutcome::TimedOut);
        assert_eq!(metrics.snapshot().wait_timeouts, 1);
        // The waiter never touches a lock it does not own.
        assert_eq!(
            store.lock_holder(&lock).unwrap(),
            Some("someone-else".to_string())
        );
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_signal() {
        let store = Arc::new(MemoryStore::new());
        let keys = KeySpace::default();
        store
            .try_acquire_lock(&keys.refill_lock(DeviceClass::Pc), "holder", Duration::from_secs(5))
            .await
            .unwrap();
        let metrics = Arc::new(MetricsCollector::new());
        let coordinator = RefillCoordinator::new(
            store.clone(),
            keys.clone(),
            CacheTimeouts {
                refill_wait: Duration::from_secs(2),
                ..fast_timeouts()
            },
            metrics,
        );

        let holder = {
            let store = store.clone();
            let keys = keys.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                store
                    .replace_list(&keys.draw_queue(DeviceClass::Pc), &names(&["x"]))
                    .await
                    .unwrap();
                store
                    .publish(&keys.refill_channel(DeviceClass::Pc), REFILL_DONE)
                    .await
                    .unwrap();
            })
        };

        let outcome = coordinator.ensure_filled(DeviceClass::Pc).await.unwrap();
        holder.await.unwrap();
        assert!(matches!(
            outcome,
            RefillOutcome::Signalled | RefillOutcome::AlreadyFilled
        ));
    }

    #[tokio::test]
    async fn test_expired_lease_of_crashed_holder_is_reclaimed() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let keys = KeySpace::default();
        store
            .replace_list(&keys.source_list(DeviceClass::Pc), &names(&["a"]))
            .await
            .unwrap();
        store
            .try_acquire_lock(&keys.refill_lock(DeviceClass::Pc), "crashed", Duration::from_secs(5))
            .await
            .unwrap();
        let (coordinator, _) = coordinator(store.clone());

        clock.advance(Duration::from_secs(6));

        let outcome = coordinator.ensure_filled(DeviceClass::Pc).await.unwrap();
        assert_eq!(outcome, RefillOutcome::Refilled { items: 1 });
    }
}
