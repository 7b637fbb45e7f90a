//! In-process [`BackingStore`] used in local-only mode and by tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Notify;

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::store::{BackingStore, Subscription};

const CHANNEL_CAPACITY: usize = 16;

struct Lease {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryState {
    lists: HashMap<String, VecDeque<String>>,
    leases: HashMap<String, Lease>,
}

impl MemoryState {
    /// Drop `key`'s lease if it has expired, returning the live one.
    fn live_lease(&mut self, key: &str, now: DateTime<Utc>) -> Option<&Lease> {
        let expired = matches!(self.leases.get(key), Some(lease) if lease.expires_at <= now);
        if expired {
            self.leases.remove(key);
        }
        self.leases.get(key)
    }
}

pub struct MemoryStore {
    state: Mutex<MemoryState>,
    list_changed: Notify,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Lease expiry follows `clock`; blocking waits still use tokio time.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            list_changed: Notify::new(),
            channels: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Token of the current, unexpired holder of `key`.
    pub fn lock_holder(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        let mut state = self.state()?;
        Ok(state.live_lease(key, now).map(|lease| lease.token.clone()))
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("Failed to acquire memory store lock".into()))
    }

    fn channels(&self) -> Result<MutexGuard<'_, HashMap<String, broadcast::Sender<String>>>> {
        self.channels
            .lock()
            .map_err(|_| Error::Internal("Failed to acquire channel registry lock".into()))
    }

    fn try_pop(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.state()?;
        let Some(list) = state.lists.get_mut(key) else {
            return Ok(None);
        };
        let item = list.pop_front();
        if list.is_empty() {
            state.lists.remove(key);
        }
        Ok(item)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        self.state().map(|_| ())
    }

    async fn list_all(&self, key: &str) -> Result<Vec<String>> {
        let state = self.state()?;
        Ok(state
            .lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        let state = self.state()?;
        Ok(state.lists.get(key).map_or(0, VecDeque::len))
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>> {
        self.try_pop(key)
    }

    async fn blocking_pop_front(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before looking so a push in between is not missed.
            let notified = self.list_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_pop(key)? {
                return Ok(Some(item));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn upsert_front(&self, key: &str, item: &str) -> Result<()> {
        {
            let mut state = self.state()?;
            let list = state.lists.entry(key.to_string()).or_default();
            list.retain(|existing| existing != item);
            list.push_front(item.to_string());
        }
        self.list_changed.notify_waiters();
        Ok(())
    }

    async fn remove_item(&self, key: &str, item: &str) -> Result<usize> {
        let mut state = self.state()?;
        let Some(list) = state.lists.get_mut(key) else {
            return Ok(0);
        };
        let before = list.len();
        list.retain(|existing| existing != item);
        let removed = before - list.len();
        if list.is_empty() {
            state.lists.remove(key);
        }
        Ok(removed)
    }

    async fn replace_list(&self, key: &str, items: &[String]) -> Result<()> {
        {
            let mut state = self.state()?;
            if items.is_empty() {
                state.lists.remove(key);
            } else {
                state
                    .lists
                    .insert(key.to_string(), items.iter().cloned().collect());
            }
        }
        self.list_changed.notify_waiters();
        Ok(())
    }

    async fn try_acquire_lock(&self, key: &str, token: &str, lease: Duration) -> Result<bool> {
        let now = self.clock.now();
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| Error::Config(format!("Lease duration out of range: {}", e)))?;
        let mut state = self.state()?;
        if state.live_lease(key, now).is_some() {
            return Ok(false);
        }
        state.leases.insert(
            key.to_string(),
            Lease {
                token: token.to_string(),
                expires_at: now + lease,
            },
        );
        Ok(true)
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut state = self.state()?;
        let held = state
            .live_lease(key, now)
            .is_some_and(|lease| lease.token == token);
        if held {
            state.leases.remove(key);
        }
        Ok(held)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let channels = self.channels()?;
        if let Some(tx) = channels.get(channel) {
            // No receivers is fine: the signal is fire-and-forget.
            let _ = tx.send(message.to_string());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>> {
        let mut channels = self.channels()?;
        let tx = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Ok(Box::new(MemorySubscription { rx: tx.subscribe() }))
    }
}

struct MemorySubscription {
    rx: broadcast::Receiver<String>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn recv(&mut self, timeout: Duration) -> Result<Option<String>> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Err(_) => Ok(None),
            Ok(Ok(message)) => Ok(Some(message)),
            // Missed messages still mean at least one was published.
            Ok(Err(RecvError::Lagged(_))) => Ok(Some(String::new())),
            Ok(Err(RecvError::Closed)) => {
                Err(Error::BackingStore("Subscription channel closed".into()))
            }
        }
    }
}
