use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::policy::ThrottlePolicy;
use crate::token_bucket::TokenBucket;

/// One client on one configured ceiling. The same client hitting routes with
/// different ceilings gets independent limiter state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimiterKey {
    pub client: String,
    pub ceiling: u32,
}

impl LimiterKey {
    pub fn new(client: impl Into<String>, ceiling: u32) -> Self {
        Self {
            client: client.into(),
            ceiling,
        }
    }
}

impl fmt::Display for LimiterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/s", self.client, self.ceiling)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed { remaining: u32 },
    Rejected { retry_after: Duration },
}

/// Per-identity token buckets, created on first use.
pub struct RateLimiterRegistry {
    limiters: DashMap<LimiterKey, TokenBucket>,
    last_seen: DashMap<LimiterKey, DateTime<Utc>>,
    policy: ThrottlePolicy,
}

impl RateLimiterRegistry {
    pub fn new(policy: ThrottlePolicy) -> Self {
        Self {
            limiters: DashMap::new(),
            last_seen: DashMap::new(),
            policy,
        }
    }

    /// Take one token from `key`'s bucket, creating the bucket if needed.
    ///
    /// Creation goes through the map's entry lock, so concurrent first
    /// requests for one identity all end up sharing a single bucket.
    pub fn admit(&self, key: &LimiterKey, now: DateTime<Utc>) -> Result<Admission> {
        if key.ceiling == 0 {
            return Err(Error::Config(format!(
                "Rate ceiling for {} must be greater than 0",
                key.client
            )));
        }

        let admission = {
            let mut bucket = self.limiters.entry(key.clone()).or_insert_with(|| {
                debug!(limiter = %key, "Creating rate limiter");
                TokenBucket::new(
                    self.policy.bucket_capacity(key.ceiling),
                    key.ceiling as f64,
                    now,
                )
            });

            if bucket.try_consume(1, now) {
                Admission::Allowed {
                    remaining: bucket.available_tokens(now),
                }
            } else {
                Admission::Rejected {
                    retry_after: bucket.time_until_available(1, now).unwrap_or_default(),
                }
            }
        };

        self.last_seen.insert(key.clone(), now);
        Ok(admission)
    }

    /// Evict limiters idle for longer than the staleness threshold, or never
    /// seen at all. Returns how many were evicted.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let Ok(stale_after) = chrono::Duration::from_std(self.policy.stale_after) else {
            return 0;
        };
        let is_stale = |seen: Option<DateTime<Utc>>| match seen {
            Some(seen) => now - seen > stale_after,
            None => true,
        };

        // Never hold a lock on one map while locking the other.
        let seen: HashMap<LimiterKey, DateTime<Utc>> = self
            .last_seen
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        let candidates: Vec<LimiterKey> = self
            .limiters
            .iter()
            .filter(|entry| is_stale(seen.get(entry.key()).copied()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for key in candidates {
            // A request that arrived since the snapshot keeps its bucket.
            if !is_stale(self.last_seen(&key)) {
                continue;
            }
            if self.limiters.remove(&key).is_some() {
                self.last_seen.remove_if(&key, |_, seen| is_stale(Some(*seen)));
                debug!(limiter = %key, "Evicted idle rate limiter");
                evicted += 1;
            }
        }

        // Stale timestamps whose limiter is already gone.
        for (key, at) in seen {
            if is_stale(Some(at)) && !self.limiters.contains_key(&key) {
                self.last_seen.remove_if(&key, |_, seen| is_stale(Some(*seen)));
            }
        }

        evicted
    }

    pub fn contains(&self, key: &LimiterKey) -> bool {
        self.limiters.contains_key(key)
    }

    /// Tokens as of the bucket's last refill, without advancing time.
    pub fn stored_tokens(&self, key: &LimiterKey) -> Option<f64> {
        self.limiters.get(key).map(|bucket| bucket.stored_tokens())
    }

    pub fn last_seen(&self, key: &LimiterKey) -> Option<DateTime<Utc>> {
        self.last_seen.get(key).map(|seen| *seen)
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}
