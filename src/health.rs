use serde::Serialize;
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tracing::warn;

use crate::device::DeviceClass;
use crate::draw_cache::DrawCache;
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::store::BackingStore;
use crate::throttler::{Throttler, ThrottlerStats};

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: DependencyStatus,
    pub queues: Vec<QueueDepth>,
    pub throttle: ThrottlerStats,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct DependencyStatus {
    pub backing_store: ServiceStatus,
}

#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub backend: String,
    pub status: String,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueueDepth {
    pub device: DeviceClass,
    /// `None` when the depth could not be read.
    pub depth: Option<usize>,
}

static START_TIME: std::sync::LazyLock<SystemTime> = std::sync::LazyLock::new(SystemTime::now);

pub struct HealthChecker {
    store: Arc<dyn BackingStore>,
    backend: &'static str,
    draw_cache: Arc<DrawCache>,
    throttler: Arc<Throttler>,
    metrics: Arc<MetricsCollector>,
}

impl HealthChecker {
    pub fn new(
        store: Arc<dyn BackingStore>,
        backend: &'static str,
        draw_cache: Arc<DrawCache>,
        throttler: Arc<Throttler>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        // Pin uptime to the first checker built, normally at startup.
        let _ = *START_TIME;
        Self {
            store,
            backend,
            draw_cache,
            throttler,
            metrics,
        }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let now = SystemTime::now();
        let uptime = now.duration_since(*START_TIME).unwrap_or_default().as_secs();

        let store_status = self.check_store().await;
        let overall_status = if store_status.status == "healthy" {
            "healthy"
        } else {
            "degraded"
        };

        let mut queues = Vec::with_capacity(DeviceClass::ALL.len());
        for device in DeviceClass::ALL {
            let depth = match self.draw_cache.queue_len(device).await {
                Ok(depth) => Some(depth),
                Err(e) => {
                    warn!(device = %device, error = %e, "Failed to read draw queue depth");
                    None
                }
            };
            queues.push(QueueDepth { device, depth });
        }

        HealthStatus {
            status: overall_status.to_string(),
            timestamp: now
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime,
            dependencies: DependencyStatus {
                backing_store: store_status,
            },
            queues,
            throttle: self.throttler.stats(),
            metrics: self.metrics.snapshot(),
        }
    }

    async fn check_store(&self) -> ServiceStatus {
        let start = Instant::now();
        let result = self.store.ping().await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => ServiceStatus {
                backend: self.backend.to_string(),
                status: "healthy".to_string(),
                response_time_ms,
                error: None,
            },
            Err(e) => {
                warn!(backend = self.backend, error = %e, "Backing store health check failed");
                ServiceStatus {
                    backend: self.backend.to_string(),
                    status: "unavailable".to_string(),
                    response_time_ms,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
