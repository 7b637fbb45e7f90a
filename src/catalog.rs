//! Keeps the source lists and draw queues in step with the image store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::device::DeviceClass;
use crate::error::{Error, Result};
use crate::image_store::ImageStore;
use crate::keys::KeySpace;
use crate::policy::CacheTimeouts;
use crate::refill::{shuffled, REFILL_DONE};
use crate::store::BackingStore;

const LOCK_RETRY_DELAY: Duration = Duration::from_millis(20);

pub struct Catalog {
    store: Arc<dyn BackingStore>,
    images: Arc<dyn ImageStore>,
    keys: KeySpace,
    timeouts: CacheTimeouts,
    cdn_base_url: String,
}

impl Catalog {
    pub fn new(
        store: Arc<dyn BackingStore>,
        images: Arc<dyn ImageStore>,
        keys: KeySpace,
        timeouts: CacheTimeouts,
        cdn_base_url: &str,
    ) -> Self {
        Self {
            store,
            images,
            keys,
            timeouts,
            cdn_base_url: cdn_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Public URL of `item`.
    pub fn image_url(&self, class: DeviceClass, item: &str) -> String {
        format!("{}/{}/{}", self.cdn_base_url, class, item)
    }

    /// Register a newly stored image. It is served next from the draw queue
    /// and kept in the source list for every later refill.
    pub async fn add_item(&self, class: DeviceClass, item: &str) -> Result<()> {
        self.holding_refill_lock(class, async {
            self.store
                .upsert_front(&self.keys.source_list(class), item)
                .await?;
            self.store
                .upsert_front(&self.keys.draw_queue(class), item)
                .await
        })
        .await?;
        debug!(device = %class, item = %item, "Added item to catalog");
        Ok(())
    }

    /// Forget `item` in both lists. Returns the number of entries removed.
    pub async fn remove_item(&self, class: DeviceClass, item: &str) -> Result<usize> {
        let (from_source, from_queue) = self
            .holding_refill_lock(class, async {
                let from_source = self
                    .store
                    .remove_item(&self.keys.source_list(class), item)
                    .await?;
                let from_queue = self
                    .store
                    .remove_item(&self.keys.draw_queue(class), item)
                    .await?;
                Ok((from_source, from_queue))
            })
            .await?;
        debug!(device = %class, item = %item, from_source, from_queue, "Removed item from catalog");
        Ok(from_source + from_queue)
    }

    /// Rebuild the source list and draw queue of `class` from the image store.
    ///
    /// Both lists are replaced atomically, so concurrent draws never see them
    /// empty mid-rescan. Only one rescan per class runs at a time.
    pub async fn rescan(&self, class: DeviceClass) -> Result<usize> {
        let lock_key = self.keys.rescan_lock(class);
        let token = Uuid::new_v4().to_string();

        if !self
            .store
            .try_acquire_lock(&lock_key, &token, self.timeouts.lock_lease)
            .await?
        {
            return Err(Error::RescanInProgress(class));
        }

        let result = self.holding_refill_lock(class, self.rebuild(class)).await;

        if let Err(e) = self.store.release_lock(&lock_key, &token).await {
            warn!(device = %class, error = %e, "Failed to release rescan lock");
        }
        result
    }

    /// Run `op` while holding the refill lock of `class`, so a refill that
    /// read the source list earlier cannot overwrite the queue afterwards.
    ///
    /// Waits at most one lease for the current holder, whose lock expires
    /// by then even if it crashed.
    async fn holding_refill_lock<T>(
        &self,
        class: DeviceClass,
        op: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let lock_key = self.keys.refill_lock(class);
        let token = Uuid::new_v4().to_string();
        let deadline = tokio::time::Instant::now() + self.timeouts.lock_lease;

        while !self
            .store
            .try_acquire_lock(&lock_key, &token, self.timeouts.lock_lease)
            .await?
        {
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Internal(format!(
                    "Timed out waiting for refill lock of device type {}",
                    class
                )));
            }
            tokio::time::sleep(LOCK_RETRY_DELAY).await;
        }

        let result = op.await;

        if let Err(e) = self.store.release_lock(&lock_key, &token).await {
            warn!(device = %class, error = %e, "Failed to release refill lock");
        }
        // Draws that queued behind us re-check the queue instead of timing out.
        if result.is_ok() {
            if let Err(e) = self
                .store
                .publish(&self.keys.refill_channel(class), REFILL_DONE)
                .await
            {
                warn!(device = %class, error = %e, "Failed to signal catalog update");
            }
        }
        result
    }

    async fn rebuild(&self, class: DeviceClass) -> Result<usize> {
        let items = self.images.list(class).await?;

        self.store
            .replace_list(&self.keys.source_list(class), &items)
            .await?;
        let count = items.len();
        self.store
            .replace_list(&self.keys.draw_queue(class), &shuffled(items))
            .await?;

        info!(device = %class, items = count, "Rescanned image store");
        Ok(count)
    }

    /// Rescan every device class, stopping at the first failure.
    pub async fn rescan_all(&self) -> Result<Vec<(DeviceClass, usize)>> {
        let mut counts = Vec::with_capacity(DeviceClass::ALL.len());
        for class in DeviceClass::ALL {
            counts.push((class, self.rescan(class).await?));
        }
        Ok(counts)
    }

    /// CDN URLs of every image currently in the image store for `class`.
    pub async fn list_urls(&self, class: DeviceClass) -> Result<Vec<String>> {
        let names = self.images.list(class).await?;
        Ok(names
            .iter()
            .map(|name| self.image_url(class, name))
            .collect())
    }

    pub fn images(&self) -> &Arc<dyn ImageStore> {
        &self.images
    }
}
