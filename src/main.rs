use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use wallpaper_api::clock::SystemClock;
use wallpaper_api::config::Config;
use wallpaper_api::config_validator::ConfigValidator;
use wallpaper_api::image_store::FsImageStore;
use wallpaper_api::memory_store::MemoryStore;
use wallpaper_api::redis_store::RedisStore;
use wallpaper_api::server::{build_state, prime_cache, Server};
use wallpaper_api::store::BackingStore;
use wallpaper_api::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::parse();

    let _telemetry = telemetry::init(&config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    ConfigValidator::validate(&config)
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    tracing::info!("Starting wallpaper service");
    tracing::info!(
        bind_addr = %config.bind_addr,
        key_prefix = %config.key_prefix,
        image_root = %config.image_root.display(),
        "Configuration loaded"
    );

    let (store, backend): (Arc<dyn BackingStore>, &'static str) = match config.redis_url() {
        Some(url) => {
            let store = RedisStore::connect(url)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to connect to Redis: {}", e))?;
            tracing::info!("Connected to Redis");
            (Arc::new(store), "redis")
        }
        None => {
            tracing::warn!("REDIS_URL not set, running local-only on an in-process store");
            (Arc::new(MemoryStore::new()), "memory")
        }
    };

    let images = Arc::new(FsImageStore::new(config.image_root.clone()));
    let state = build_state(&config, store, backend, images, Arc::new(SystemClock));

    prime_cache(&config, &state)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize wallpaper cache: {}", e))?;

    Server::new(&config, state)
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
