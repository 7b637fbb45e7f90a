//! Per-device-class draw queues backed by the shared store.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::device::DeviceClass;
use crate::error::{Error, Result};
use crate::keys::KeySpace;
use crate::metrics::MetricsCollector;
use crate::policy::CacheTimeouts;
use crate::refill::{RefillCoordinator, RefillOutcome};
use crate::store::BackingStore;

pub struct DrawCache {
    store: Arc<dyn BackingStore>,
    keys: KeySpace,
    timeouts: CacheTimeouts,
    coordinator: RefillCoordinator,
    metrics: Arc<MetricsCollector>,
}

impl DrawCache {
    pub fn new(
        store: Arc<dyn BackingStore>,
        keys: KeySpace,
        timeouts: CacheTimeouts,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let coordinator =
            RefillCoordinator::new(store.clone(), keys.clone(), timeouts, metrics.clone());
        Self {
            store,
            keys,
            timeouts,
            coordinator,
            metrics,
        }
    }

    /// Remove and return one item from the draw queue of `class`.
    ///
    /// An empty queue triggers the refill protocol, after which the pop blocks
    /// for at most `pop_wait`. Each successful pop consumes exactly one entry.
    pub async fn pop(&self, class: DeviceClass) -> Result<String> {
        let queue = self.keys.draw_queue(class);

        if let Some(item) = self.store.pop_front(&queue).await? {
            return Ok(self.delivered(class, item));
        }

        debug!(device = %class, "Draw queue empty, coordinating refill");
        let outcome = self.coordinator.ensure_filled(class).await?;

        match self
            .store
            .blocking_pop_front(&queue, self.timeouts.pop_wait)
            .await?
        {
            Some(item) => Ok(self.delivered(class, item)),
            None if outcome == RefillOutcome::TimedOut => Err(Error::RefillTimeout(class)),
            None => Err(Error::PopTimeout(class)),
        }
    }

    /// [`pop`](Self::pop) with the single permitted retry after a timeout.
    pub async fn draw(&self, class: DeviceClass) -> Result<String> {
        match self.pop(class).await {
            Err(e) if e.is_retryable() => {
                warn!(device = %class, error = %e, "Draw timed out, retrying once");
                self.pop(class).await
            }
            other => other,
        }
    }

    pub async fn queue_len(&self, class: DeviceClass) -> Result<usize> {
        self.store.list_len(&self.keys.draw_queue(class)).await
    }

    pub fn coordinator(&self) -> &RefillCoordinator {
        &self.coordinator
    }

    fn delivered(&self, class: DeviceClass, item: String) -> String {
        self.metrics.record_draw();
        debug!(device = %class, item = %item, "Drew item");
        item
    }
}
