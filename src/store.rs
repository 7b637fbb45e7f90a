//! Backing-store primitives the draw cache and refill protocol are built on.
//!
//! Any store offering these semantics works. Operations documented as atomic
//! must be a single indivisible step on the store, never a read followed by a
//! write from the caller.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

#[async_trait]
pub trait BackingStore: Send + Sync {
    async fn ping(&self) -> Result<()>;

    /// Entire list, front to back. Missing lists read as empty.
    async fn list_all(&self, key: &str) -> Result<Vec<String>>;

    async fn list_len(&self, key: &str) -> Result<usize>;

    async fn pop_front(&self, key: &str) -> Result<Option<String>>;

    /// Pop from the front, waiting up to `timeout` for an entry to appear.
    async fn blocking_pop_front(&self, key: &str, timeout: Duration) -> Result<Option<String>>;

    /// Atomically remove every copy of `item` and push it to the front.
    async fn upsert_front(&self, key: &str, item: &str) -> Result<()>;

    /// Remove every copy of `item`, returning how many were removed.
    async fn remove_item(&self, key: &str, item: &str) -> Result<usize>;

    /// Atomically clear the list and bulk-insert `items` in order.
    async fn replace_list(&self, key: &str, items: &[String]) -> Result<()>;

    /// Set `key` to `token` only if absent, expiring after `lease`.
    async fn try_acquire_lock(&self, key: &str, token: &str, lease: Duration) -> Result<bool>;

    /// Delete `key` only if it still holds `token`.
    async fn release_lock(&self, key: &str, token: &str) -> Result<bool>;

    async fn publish(&self, channel: &str, message: &str) -> Result<()>;

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>>;
}

#[async_trait]
pub trait Subscription: Send {
    /// Next message, or `None` once `timeout` elapses without one.
    async fn recv(&mut self, timeout: Duration) -> Result<Option<String>>;
}
