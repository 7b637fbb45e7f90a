use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::catalog::Catalog;
use crate::clock::Clock;
use crate::config::Config;
use crate::draw_cache::DrawCache;
use crate::error::Result;
use crate::handlers::{
    delete, fallback, health_check, readiness_check, refresh_cache_by_device, reset_cache,
    select_images, upload, wallpaper, AppState,
};
use crate::health::HealthChecker;
use crate::image_store::ImageStore;
use crate::metrics::MetricsCollector;
use crate::middleware::{logging_middleware, rate_limit, RouteLimit};
use crate::store::BackingStore;
use crate::sweeper::SweeperHandle;
use crate::throttler::Throttler;

/// Room for a full batch of large images.
const UPLOAD_BODY_LIMIT: usize = 64 * 1024 * 1024;

/// Wire the draw cache, catalog, throttler and health checker over `store`.
pub fn build_state(
    config: &Config,
    store: Arc<dyn BackingStore>,
    backend: &'static str,
    images: Arc<dyn ImageStore>,
    clock: Arc<dyn Clock>,
) -> AppState {
    let keys = config.key_space();
    let timeouts = config.cache_timeouts();
    let metrics = Arc::new(MetricsCollector::new());

    let draw_cache = Arc::new(DrawCache::new(
        store.clone(),
        keys.clone(),
        timeouts,
        metrics.clone(),
    ));
    let catalog = Arc::new(Catalog::new(
        store.clone(),
        images,
        keys,
        timeouts,
        &config.cdn_base_url,
    ));
    let throttler = Arc::new(Throttler::new(config.throttle_policy(), clock, metrics.clone()));
    let health = Arc::new(HealthChecker::new(
        store,
        backend,
        draw_cache.clone(),
        throttler.clone(),
        metrics,
    ));

    AppState {
        draw_cache,
        catalog,
        throttler,
        health,
        upload_password: Arc::from(config.upload_password.as_str()),
    }
}

/// Rebuild the lists from the image store when `rescan_on_startup` is set.
pub async fn prime_cache(config: &Config, state: &AppState) -> Result<()> {
    if !config.rescan_on_startup {
        return Ok(());
    }
    for (device, items) in state.catalog.rescan_all().await? {
        info!(device = %device, items, "Initialized wallpaper cache");
    }
    Ok(())
}

fn static_routes(dir: &Path) -> Router<AppState> {
    Router::new()
        .route_service("/", ServeFile::new(dir.join("index.html")))
        .nest_service("/static", ServeDir::new(dir))
}

pub fn create_app(state: AppState, config: &Config) -> Router {
    let limits = config.route_limits();
    let throttler = state.throttler.clone();
    let limited = move |ceiling: u32| {
        middleware::from_fn_with_state(RouteLimit::new(throttler.clone(), ceiling), rate_limit)
    };

    let wallpaper_routes = Router::new()
        .route("/wallpaper", get(wallpaper))
        .route_layer(limited(limits.wallpaper));

    let admin_routes = Router::new()
        .route("/resetCache", get(reset_cache))
        .route("/refreshCacheByDevice", get(refresh_cache_by_device))
        .route_layer(limited(limits.admin));

    let upload_routes = Router::new()
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/delete", get(delete).post(delete))
        .route("/selectImages", get(select_images))
        .route_layer(limited(limits.upload));

    Router::new()
        // Health and readiness endpoints
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .merge(wallpaper_routes)
        .merge(admin_routes)
        .merge(upload_routes)
        .merge(static_routes(&config.static_dir))
        .fallback(fallback)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
    sweeper: SweeperHandle,
}

impl Server {
    /// Build the router and start the throttle sweeper.
    pub fn new(config: &Config, state: AppState) -> Self {
        let sweeper = state.throttler.spawn_sweeper();
        let app = create_app(state, config);

        Self {
            app,
            bind_addr: config.bind_addr,
            sweeper,
        }
    }

    pub async fn run(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        info!("Wallpaper server listening on {}", listener.local_addr()?);
        info!("Health check available at /health");
        info!("Readiness check available at /ready");

        // Run server with graceful shutdown
        let served = axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        self.sweeper.shutdown().await;
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
