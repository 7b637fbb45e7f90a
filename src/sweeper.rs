//! Background eviction of idle throttle state.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::throttler::Throttler;

pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the loop and wait for it to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.task.await {
            warn!(error = %e, "Throttle sweeper task ended abnormally");
        }
    }
}

/// Sweep `throttler` every `every` until the handle is shut down. The first
/// sweep runs one interval after start.
pub fn spawn(throttler: Arc<Throttler>, every: Duration) -> SweeperHandle {
    let (tx, mut rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        info!(interval_secs = every.as_secs(), "Starting throttle sweeper");
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = throttler.sweep();
                    debug!(
                        evicted_limiters = report.evicted_limiters,
                        expired_blocks = report.expired_blocks,
                        "Throttle sweep finished"
                    );
                }
                _ = &mut rx => {
                    info!("Throttle sweeper shutting down");
                    break;
                }
            }
        }
    });

    SweeperHandle {
        shutdown: Some(tx),
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::metrics::MetricsCollector;
    use crate::policy::ThrottlePolicy;

    #[tokio::test]
    async fn test_sweeper_evicts_idle_limiters_and_stops() {
        let clock = Arc::new(ManualClock::default());
        let throttler = Arc::new(Throttler::new(
            ThrottlePolicy::default(),
            clock.clone(),
            Arc::new(MetricsCollector::new()),
        ));
        throttler.check("203.0.113.1", 5).unwrap();
        clock.advance(Duration::from_secs(16 * 60));

        let handle = spawn(throttler.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.shutdown().await;

        assert_eq!(throttler.stats().limiters, 0);
    }

    #[tokio::test]
    async fn test_shutdown_before_first_tick() {
        let throttler = Arc::new(Throttler::new(
            ThrottlePolicy::default(),
            Arc::new(ManualClock::default()),
            Arc::new(MetricsCollector::new()),
        ));
        throttler.check("203.0.113.1", 5).unwrap();

        let handle = spawn(throttler.clone(), Duration::from_secs(3600));
        handle.shutdown().await;

        assert_eq!(throttler.stats().limiters, 1);
    }
}
