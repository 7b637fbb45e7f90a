use clap::{ArgAction, Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::keys::{KeySpace, DEFAULT_PREFIX};
use crate::policy::{CacheTimeouts, RouteLimits, ThrottlePolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Service configuration, read from flags with environment fallbacks.
#[derive(Debug, Clone, Parser)]
#[command(name = "wallpaper-api", version, about = "Random wallpaper service")]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Redis connection URL. Empty runs local-only on an in-process store.
    #[arg(long, env = "REDIS_URL", default_value = "")]
    pub redis_url: String,

    /// Namespace prefix for every backing-store key
    #[arg(long, env = "KEY_PREFIX", default_value = DEFAULT_PREFIX)]
    pub key_prefix: String,

    /// Base URL images are served from
    #[arg(long, env = "CDN_BASE_URL", default_value = "http://127.0.0.1:8080")]
    pub cdn_base_url: String,

    /// Directory holding one sub-directory of images per device type
    #[arg(long, env = "IMAGE_ROOT", default_value = "./images")]
    pub image_root: PathBuf,

    /// Shared secret for upload and delete. Empty disables both.
    #[arg(long, env = "UPLOAD_PASSWORD", default_value = "", hide_env_values = true)]
    pub upload_password: String,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Also write logs to this file, rotated daily
    #[arg(long = "log-file", env = "LOG_FILE_PATH")]
    pub log_file: Option<PathBuf>,

    /// Directory served under /static; its index.html is the landing page
    #[arg(long, env = "STATIC_DIR", default_value = "./static")]
    pub static_dir: PathBuf,

    /// Token bucket capacity multiplier
    #[arg(long, env = "BUCKET_CAPACITY_MULTIPLIER", default_value_t = 1)]
    pub bucket_capacity_multiplier: u32,

    #[arg(long, env = "BLOCK_COOLDOWN_SECS", default_value_t = 120)]
    pub block_cooldown_secs: u64,

    /// Idle time after which a client's limiter is evicted
    #[arg(long, env = "STALE_AFTER_SECS", default_value_t = 900)]
    pub stale_after_secs: u64,

    /// Rate limiter cleanup interval in seconds
    #[arg(long = "cleanup-interval", env = "CLEANUP_INTERVAL", default_value_t = 1800)]
    pub cleanup_interval_secs: u64,

    #[arg(long, env = "REFILL_LEASE_MS", default_value_t = 5000)]
    pub refill_lease_ms: u64,

    #[arg(long, env = "REFILL_WAIT_MS", default_value_t = 3000)]
    pub refill_wait_ms: u64,

    #[arg(long, env = "POP_WAIT_MS", default_value_t = 2000)]
    pub pop_wait_ms: u64,

    /// Requests per second per client on the draw endpoint
    #[arg(long, env = "WALLPAPER_RATE_LIMIT", default_value_t = 5)]
    pub wallpaper_rate_limit: u32,

    /// Requests per second per client on the cache maintenance endpoints
    #[arg(long, env = "ADMIN_RATE_LIMIT", default_value_t = 5)]
    pub admin_rate_limit: u32,

    /// Requests per second per client on upload, delete and listing
    #[arg(long, env = "UPLOAD_RATE_LIMIT", default_value_t = 2)]
    pub upload_rate_limit: u32,

    /// Rebuild every source list from the image store before serving
    #[arg(long, env = "RESCAN_ON_STARTUP", default_value_t = true, action = ArgAction::Set)]
    pub rescan_on_startup: bool,
}

impl Default for Config {
    fn default() -> Self {
        let timeouts = CacheTimeouts::default();
        let policy = ThrottlePolicy::default();
        let limits = RouteLimits::default();
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            redis_url: String::new(),
            key_prefix: DEFAULT_PREFIX.to_string(),
            cdn_base_url: "http://127.0.0.1:8080".to_string(),
            image_root: PathBuf::from("./images"),
            upload_password: String::new(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            log_file: None,
            static_dir: PathBuf::from("./static"),
            bucket_capacity_multiplier: policy.burst_multiplier,
            block_cooldown_secs: policy.block_cooldown.as_secs(),
            stale_after_secs: policy.stale_after.as_secs(),
            cleanup_interval_secs: policy.sweep_interval.as_secs(),
            refill_lease_ms: timeouts.lock_lease.as_millis() as u64,
            refill_wait_ms: timeouts.refill_wait.as_millis() as u64,
            pop_wait_ms: timeouts.pop_wait.as_millis() as u64,
            wallpaper_rate_limit: limits.wallpaper,
            admin_rate_limit: limits.admin,
            upload_rate_limit: limits.upload,
            rescan_on_startup: true,
        }
    }
}

impl Config {
    /// Redis URL, or `None` for local-only mode.
    pub fn redis_url(&self) -> Option<&str> {
        let url = self.redis_url.trim();
        (!url.is_empty()).then_some(url)
    }

    pub fn key_space(&self) -> KeySpace {
        KeySpace::new(&self.key_prefix)
    }

    pub fn cache_timeouts(&self) -> CacheTimeouts {
        CacheTimeouts {
            lock_lease: Duration::from_millis(self.refill_lease_ms),
            refill_wait: Duration::from_millis(self.refill_wait_ms),
            pop_wait: Duration::from_millis(self.pop_wait_ms),
        }
    }

    pub fn throttle_policy(&self) -> ThrottlePolicy {
        ThrottlePolicy {
            burst_multiplier: self.bucket_capacity_multiplier,
            block_cooldown: Duration::from_secs(self.block_cooldown_secs),
            stale_after: Duration::from_secs(self.stale_after_secs),
            sweep_interval: Duration::from_secs(self.cleanup_interval_secs),
        }
    }

    pub fn route_limits(&self) -> RouteLimits {
        RouteLimits {
            wallpaper: self.wallpaper_rate_limit,
            admin: self.admin_rate_limit,
            upload: self.upload_rate_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_policy_defaults() {
        let config = Config::default();
        assert_eq!(config.cache_timeouts(), CacheTimeouts::default());
        assert_eq!(config.throttle_policy(), ThrottlePolicy::default());
        assert_eq!(config.route_limits(), RouteLimits::default());
        assert_eq!(config.redis_url(), None);
        assert!(config.rescan_on_startup);
        assert_eq!(config.log_file, None);
    }

    #[test]
    fn test_parsed_defaults_rescan_on_startup() {
        let config = Config::try_parse_from(["wallpaper-api"]).unwrap();
        assert!(config.rescan_on_startup);
        assert_eq!(config.static_dir, PathBuf::from("./static"));
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = Config::try_parse_from([
            "wallpaper-api",
            "--redis-url",
            "redis://cache:6379",
            "--wallpaper-rate-limit",
            "10",
            "--log-format",
            "json",
            "--rescan-on-startup",
            "false",
            "--log-file",
            "logs/application.log",
            "--cleanup-interval",
            "60",
        ])
        .unwrap();

        assert_eq!(config.redis_url(), Some("redis://cache:6379"));
        assert_eq!(config.route_limits().wallpaper, 10);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(!config.rescan_on_startup);
        assert_eq!(config.log_file, Some(PathBuf::from("logs/application.log")));
        assert_eq!(config.throttle_policy().sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_blank_redis_url_means_local_only() {
        let config = Config {
            redis_url: "   ".to_string(),
            ..Config::default()
        };
        assert_eq!(config.redis_url(), None);
    }

    #[test]
    fn test_key_space_uses_prefix() {
        let config = Config {
            key_prefix: "staging".to_string(),
            ..Config::default()
        };
        assert_eq!(config.key_space().prefix(), "staging");
    }
}
