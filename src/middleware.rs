use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::response::ApiResponse;
use crate::throttler::{Decision, Throttler};

const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = get_client_ip(&request);

    info!(
        target: "wallpaper_api::middleware",
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    let response = next.run(request).await;

    let status = response.status();
    info!(
        target: "wallpaper_api::middleware",
        method = %method,
        uri = %uri,
        status = %status,
        "Request completed"
    );

    response
}

/// Per-route throttle: one shared [`Throttler`] and the route's ceiling in
/// requests per second.
#[derive(Clone)]
pub struct RouteLimit {
    pub throttler: Arc<Throttler>,
    pub ceiling: u32,
}

impl RouteLimit {
    pub fn new(throttler: Arc<Throttler>, ceiling: u32) -> Self {
        Self { throttler, ceiling }
    }
}

pub async fn rate_limit(State(limit): State<RouteLimit>, request: Request, next: Next) -> Response {
    let client_ip = get_client_ip(&request);

    match limit.throttler.check(&client_ip, limit.ceiling) {
        Ok(Decision::Allowed { remaining }) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(limit.ceiling));
            headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
            response
        }
        Ok(decision) => too_many_requests(&decision),
        Err(e) => e.into_response(),
    }
}

fn too_many_requests(decision: &Decision) -> Response {
    let message = match decision.until() {
        Some(until) => format!(
            "too many requests, please wait until {}",
            until.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => "too many requests".to_string(),
    };

    let mut response =
        ApiResponse::<()>::error(StatusCode::TOO_MANY_REQUESTS, "too many requests", message)
            .into_response();
    let retry_after = retry_after_secs(decision.retry_after().unwrap_or_default());
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

/// Whole seconds, rounded up, never below one.
fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

/// Client identity: first forwarded address, then the real-IP header, then the
/// socket peer.
pub fn get_client_ip(request: &Request) -> String {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                let first_ip = first_ip.trim();
                if !first_ip.is_empty() {
                    return first_ip.to_string();
                }
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            let ip_str = ip_str.trim();
            if !ip_str.is_empty() {
                return ip_str.to_string();
            }
        }
    }

    // Fallback to connection info
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        addr.ip().to_string()
    } else if let Some(addr) = request.extensions().get::<SocketAddr>() {
        addr.ip().to_string()
    } else {
        "unknown".to_string()
    }
}
