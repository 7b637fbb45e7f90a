use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the service counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub draws: u64,
    pub refills: u64,
    pub refill_waits: u64,
    pub wait_timeouts: u64,
    pub admitted_requests: u64,
    pub throttled_requests: u64,
}

/// Process-wide counters, shared by the draw cache and the throttler.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    draws: AtomicU64,
    refills: AtomicU64,
    refill_waits: AtomicU64,
    wait_timeouts: AtomicU64,
    admitted_requests: AtomicU64,
    throttled_requests: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_draw(&self) {
        self.draws.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refill(&self) {
        self.refills.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refill_wait(&self, timed_out: bool) {
        self.refill_waits.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.wait_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_request(&self, allowed: bool) {
        if allowed {
            self.admitted_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.throttled_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            draws: self.draws.load(Ordering::Relaxed),
            refills: self.refills.load(Ordering::Relaxed),
            refill_waits: self.refill_waits.load(Ordering::Relaxed),
            wait_timeouts: self.wait_timeouts.load(Ordering::Relaxed),
            admitted_requests: self.admitted_requests.load(Ordering::Relaxed),
            throttled_requests: self.throttled_requests.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_counters_split_by_outcome() {
        let metrics = MetricsCollector::new();
        metrics.record_request(true);
        metrics.record_request(true);
        metrics.record_request(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.admitted_requests, 2);
        assert_eq!(snapshot.throttled_requests, 1);
    }

    #[test]
    fn test_wait_timeouts_are_a_subset_of_waits() {
        let metrics = MetricsCollector::new();
        metrics.record_refill_wait(false);
        metrics.record_refill_wait(true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.refill_waits, 2);
        assert_eq!(snapshot.wait_timeouts, 1);
    }
}
