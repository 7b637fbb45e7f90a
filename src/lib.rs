pub mod block_window;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod config_validator;
pub mod device;
pub mod draw_cache;
pub mod error;
pub mod handlers;
pub mod health;
pub mod image_store;
pub mod keys;
pub mod memory_store;
pub mod metrics;
pub mod middleware;
pub mod policy;
pub mod rate_limiter;
pub mod redis_store;
pub mod refill;
pub mod response;
pub mod server;
pub mod store;
pub mod sweeper;
pub mod telemetry;
pub mod throttler;
pub mod token_bucket;
pub mod validation;

pub use config::Config;
pub use device::DeviceClass;
pub use draw_cache::DrawCache;
pub use error::{Error, Result};
pub use response::ApiResponse;
pub use server::{build_state, create_app, prime_cache};
pub use throttler::{Decision, Throttler};
