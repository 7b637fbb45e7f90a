use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded waits of the refill protocol. None of them may be zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheTimeouts {
    /// Lifetime of the refill lock if its holder never releases it.
    #[serde(with = "humantime_serde")]
    pub lock_lease: Duration,
    /// How long a non-holder waits for the refill-done signal.
    #[serde(with = "humantime_serde")]
    pub refill_wait: Duration,
    /// How long a pop blocks for an entry to appear.
    #[serde(with = "humantime_serde")]
    pub pop_wait: Duration,
}

impl Default for CacheTimeouts {
    fn default() -> Self {
        Self {
            lock_lease: Duration::from_secs(5),
            refill_wait: Duration::from_secs(3),
            pop_wait: Duration::from_secs(2),
        }
    }
}

impl CacheTimeouts {
    pub fn validate(&self) -> Result<(), String> {
        if self.lock_lease.is_zero() {
            return Err("Refill lock lease must be greater than 0".to_string());
        }
        if self.refill_wait.is_zero() {
            return Err("Refill wait must be greater than 0".to_string());
        }
        if self.pop_wait.is_zero() {
            return Err("Pop wait must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Limiter sizing, block windows and idle eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottlePolicy {
    /// Bucket capacity is `ceiling * burst_multiplier`, at least 1.
    pub burst_multiplier: u32,
    #[serde(with = "humantime_serde")]
    pub block_cooldown: Duration,
    /// Limiters idle for longer than this are evicted by the sweeper.
    #[serde(with = "humantime_serde")]
    pub stale_after: Duration,
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            burst_multiplier: 1,
            block_cooldown: Duration::from_secs(120),
            stale_after: Duration::from_secs(15 * 60),
            sweep_interval: Duration::from_secs(30 * 60),
        }
    }
}

impl ThrottlePolicy {
    pub fn bucket_capacity(&self, ceiling: u32) -> u32 {
        ceiling.saturating_mul(self.burst_multiplier).max(1)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.burst_multiplier == 0 {
            return Err("Burst multiplier must be greater than 0".to_string());
        }
        if self.block_cooldown.is_zero() {
            return Err("Block cooldown must be greater than 0".to_string());
        }
        if self.stale_after.is_zero() {
            return Err("Staleness threshold must be greater than 0".to_string());
        }
        if self.sweep_interval.is_zero() {
            return Err("Sweep interval must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Requests per second allowed per client on each route group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteLimits {
    pub wallpaper: u32,
    /// Cache reset and refresh endpoints.
    pub admin: u32,
    /// Upload, delete and listing endpoints.
    pub upload: u32,
}

impl Default for RouteLimits {
    fn default() -> Self {
        Self {
            wallpaper: 5,
            admin: 5,
            upload: 2,
        }
    }
}

impl RouteLimits {
    pub fn validate(&self) -> Result<(), String> {
        for (name, ceiling) in [
            ("wallpaper", self.wallpaper),
            ("admin", self.admin),
            ("upload", self.upload),
        ] {
            if ceiling == 0 {
                return Err(format!("Rate limit for {} routes must be greater than 0", name));
            }
        }
        Ok(())
    }
}
