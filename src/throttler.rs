use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::block_window::BlockWindowTracker;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::metrics::MetricsCollector;
use crate::policy::ThrottlePolicy;
use crate::rate_limiter::{Admission, LimiterKey, RateLimiterRegistry};
use crate::sweeper::{self, SweeperHandle};

/// Outcome of one throttle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    /// The limiter just ran dry and a block window was installed.
    RateLimited {
        until: DateTime<Utc>,
        retry_after: Duration,
    },
    /// An earlier block window is still active. The limiter was not consulted.
    Blocked {
        until: DateTime<Utc>,
        retry_after: Duration,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Decision::Allowed { .. } => None,
            Decision::RateLimited { retry_after, .. } | Decision::Blocked { retry_after, .. } => {
                Some(*retry_after)
            }
        }
    }

    pub fn until(&self) -> Option<DateTime<Utc>> {
        match self {
            Decision::Allowed { .. } => None,
            Decision::RateLimited { until, .. } | Decision::Blocked { until, .. } => Some(*until),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub evicted_limiters: usize,
    pub expired_blocks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThrottlerStats {
    pub limiters: usize,
    pub blocked_clients: usize,
    pub block_cooldown_secs: u64,
}

/// Adaptive per-client throttle: token-bucket limiting with escalation to a
/// fixed block window once a client exhausts its bucket.
pub struct Throttler {
    limiters: RateLimiterRegistry,
    blocks: BlockWindowTracker,
    policy: ThrottlePolicy,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
}

impl Throttler {
    pub fn new(policy: ThrottlePolicy, clock: Arc<dyn Clock>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            limiters: RateLimiterRegistry::new(policy),
            blocks: BlockWindowTracker::new(policy.block_cooldown),
            policy,
            clock,
            metrics,
        }
    }

    /// Decide whether `client` may make one more request at `ceiling`
    /// requests per second.
    pub fn check(&self, client: &str, ceiling: u32) -> Result<Decision> {
        if ceiling == 0 {
            return Err(Error::Config(format!(
                "Rate ceiling for {} must be greater than 0",
                client
            )));
        }

        let key = LimiterKey::new(client, ceiling);
        let now = self.clock.now();

        if let Some(window) = self.blocks.active(&key, now) {
            debug!(limiter = %key, until = %window.until, "Request inside block window");
            self.metrics.record_request(false);
            return Ok(Decision::Blocked {
                until: window.until,
                retry_after: window.remaining,
            });
        }

        let decision = match self.limiters.admit(&key, now)? {
            Admission::Allowed { remaining } => Decision::Allowed { remaining },
            Admission::Rejected { .. } => {
                let until = self.blocks.block(&key, now);
                warn!(limiter = %key, until = %until, "Rate limit exceeded, blocking client");
                Decision::RateLimited {
                    until,
                    retry_after: self.blocks.cooldown(),
                }
            }
        };

        self.metrics.record_request(decision.is_allowed());
        Ok(decision)
    }

    /// Evict idle limiters and drop expired block windows.
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let report = SweepReport {
            evicted_limiters: self.limiters.sweep(now),
            expired_blocks: self.blocks.sweep_expired(now),
        };

        if report != SweepReport::default() {
            info!(
                evicted_limiters = report.evicted_limiters,
                expired_blocks = report.expired_blocks,
                remaining = self.limiters.len(),
                "Swept throttle state"
            );
        }
        report
    }

    /// Start the periodic sweep on the configured interval.
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        sweeper::spawn(Arc::clone(self), self.policy.sweep_interval)
    }

    pub fn stats(&self) -> ThrottlerStats {
        ThrottlerStats {
            limiters: self.limiters.len(),
            blocked_clients: self.blocks.len(),
            block_cooldown_secs: self.policy.block_cooldown.as_secs(),
        }
    }

    pub fn policy(&self) -> &ThrottlePolicy {
        &self.policy
    }

    pub fn limiters(&self) -> &RateLimiterRegistry {
        &self.limiters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn throttler() -> (Throttler, Arc<ManualClock>, Arc<MetricsCollector>) {
        let clock = Arc::new(ManualClock::default());
        let metrics = Arc::new(MetricsCollector::new());
        let throttler = Throttler::new(ThrottlePolicy::default(), clock.clone(), metrics.clone());
        (throttler, clock, metrics)
    }

    #[test]
    fn test_violation_escalates_to_block_window() {
        let (throttler, clock, metrics) = throttler();
        let client = "198.51.100.4";
        let key = LimiterKey::new(client, 5);

        for _ in 0..5 {
            assert!(throttler.check(client, 5).unwrap().is_allowed());
        }

        let sixth = throttler.check(client, 5).unwrap();
        assert!(matches!(sixth, Decision::RateLimited { .. }));
        assert_eq!(sixth.retry_after(), Some(Duration::from_secs(120)));
        let until = sixth.until().unwrap();

        // Inside the window the limiter is left alone.
        clock.advance(Duration::from_secs(1));
        let tokens_before = throttler.limiters().stored_tokens(&key);
        let blocked = throttler.check(client, 5).unwrap();
        assert_eq!(
            blocked,
            Decision::Blocked {
                until,
                retry_after: Duration::from_secs(119),
            }
        );
        assert_eq!(throttler.limiters().stored_tokens(&key), tokens_before);

        clock.advance(Duration::from_secs(120));
        assert!(throttler.check(client, 5).unwrap().is_allowed());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.admitted_requests, 6);
        assert_eq!(snapshot.throttled_requests, 2);
    }

    #[test]
    fn test_block_is_scoped_to_the_violated_ceiling() {
        let (throttler, _, _) = throttler();
        let client = "198.51.100.4";

        assert!(throttler.check(client, 1).unwrap().is_allowed());
        assert!(!throttler.check(client, 1).unwrap().is_allowed());

        assert!(throttler.check(client, 5).unwrap().is_allowed());
        assert!(throttler.check("198.51.100.5", 1).unwrap().is_allowed());
    }

    #[test]
    fn test_zero_ceiling_is_rejected() {
        let (throttler, _, _) = throttler();
        let err = throttler.check("198.51.100.4", 0).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(throttler.stats().limiters, 0);
    }

    #[test]
    fn test_sweep_evicts_idle_clients_and_expired_blocks() {
        let (throttler, clock, _) = throttler();
        throttler.check("idle", 1).unwrap();
        throttler.check("idle", 1).unwrap();
        assert_eq!(throttler.stats().blocked_clients, 1);

        clock.advance(Duration::from_secs(20 * 60));
        throttler.check("busy", 1).unwrap();

        let report = throttler.sweep();
        assert_eq!(
            report,
            SweepReport {
                evicted_limiters: 1,
                expired_blocks: 1,
            }
        );
        let stats = throttler.stats();
        assert_eq!(stats.limiters, 1);
        assert_eq!(stats.blocked_clients, 0);
    }

    #[test]
    fn test_sweep_with_nothing_to_do() {
        let (throttler, _, _) = throttler();
        throttler.check("fresh", 5).unwrap();
        assert_eq!(throttler.sweep(), SweepReport::default());
    }
}
