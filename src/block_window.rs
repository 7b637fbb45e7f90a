//! Temporary bans installed after a limiter rejection.
//!
//! An active window rejects the identity before its limiter is consulted, so
//! a burst of violations becomes one enforced cooldown instead of continuous
//! limiter churn.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;
use tracing::debug;

use crate::clock::remaining;
use crate::rate_limiter::LimiterKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockWindow {
    pub until: DateTime<Utc>,
    pub remaining: Duration,
}

pub struct BlockWindowTracker {
    windows: DashMap<LimiterKey, DateTime<Utc>>,
    cooldown: Duration,
}

impl BlockWindowTracker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// The active window for `key`, if any. An expired window is cleared.
    pub fn active(&self, key: &LimiterKey, now: DateTime<Utc>) -> Option<BlockWindow> {
        let until = *self.windows.get(key)?;

        if now < until {
            return Some(BlockWindow {
                until,
                remaining: remaining(now, until),
            });
        }

        // Only clear if nobody renewed the window in the meantime.
        if self.windows.remove_if(key, |_, at| *at <= now).is_some() {
            debug!(limiter = %key, "Block window expired");
        }
        None
    }

    /// Block `key` for one cooldown starting at `now`.
    pub fn block(&self, key: &LimiterKey, now: DateTime<Utc>) -> DateTime<Utc> {
        let until = chrono::Duration::from_std(self.cooldown)
            .ok()
            .and_then(|cooldown| now.checked_add_signed(cooldown))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.windows.insert(key.clone(), until);
        until
    }

    /// Drop every window that has already expired.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, until| *until > now);
        before.saturating_sub(self.windows.len())
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
