use axum::{
    extract::{rejection::JsonRejection, Multipart, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use validator::Validate;

use crate::catalog::Catalog;
use crate::device::DeviceClass;
use crate::draw_cache::DrawCache;
use crate::error::{Error, Result};
use crate::health::HealthChecker;
use crate::response::ApiResponse;
use crate::throttler::Throttler;
use crate::validation::{DeleteRequest, RequestValidator};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub draw_cache: Arc<DrawCache>,
    pub catalog: Arc<Catalog>,
    pub throttler: Arc<Throttler>,
    pub health: Arc<HealthChecker>,
    pub upload_password: Arc<str>,
}

#[derive(Debug, Deserialize)]
pub struct WallpaperQuery {
    #[serde(rename = "type")]
    pub device_type: Option<String>,
    #[serde(rename = "dataType")]
    pub data_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshQuery {
    #[serde(rename = "type")]
    pub device_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SelectQuery {
    #[serde(rename = "deviceType")]
    pub device_type: Option<String>,
}

/// Liveness probe
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Readiness probe with dependency, queue and throttle detail
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.health.check_health().await;
    let status = if health.status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

/// Draw one wallpaper and return it as JSON, plain text or a redirect
pub async fn wallpaper(
    State(state): State<AppState>,
    Query(query): Query<WallpaperQuery>,
) -> Result<Response> {
    let class = RequestValidator::device_class(query.device_type.as_deref())?;
    let item = state.draw_cache.draw(class).await?;
    let url = state.catalog.image_url(class, &item);

    info!(device = %class, url = %url, "Serving wallpaper");

    Ok(match query.data_type.as_deref() {
        Some("json") => ApiResponse::success("Wallpaper URL retrieved successfully", url).into_response(),
        Some("url") => url.into_response(),
        _ => (StatusCode::FOUND, [(header::LOCATION, url)]).into_response(),
    })
}

/// Rebuild every device type's lists from the image store
pub async fn reset_cache(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let counts: HashMap<DeviceClass, usize> = state.catalog.rescan_all().await?.into_iter().collect();
    Ok(ApiResponse::success("Cache initialized successfully", counts))
}

pub async fn refresh_cache_by_device(
    State(state): State<AppState>,
    Query(query): Query<RefreshQuery>,
) -> Result<impl IntoResponse> {
    let class = RequestValidator::device_class(query.device_type.as_deref())?;
    let items = state.catalog.rescan(class).await?;

    Ok(ApiResponse::success(
        format!("Cache for device type '{}' refreshed successfully", class),
        serde_json::json!({ "device": class, "items": items }),
    ))
}

/// Multipart upload of 1 to 5 images for one device type
pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Result<impl IntoResponse> {
    let mut device_type = None;
    let mut password = String::new();
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidRequest(format!("Malformed multipart body: {}", e)))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("deviceType") => device_type = Some(field_text(field).await?),
            Some("password") => password = field_text(field).await?,
            Some("files") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| Error::InvalidRequest(format!("Failed to read '{}': {}", name, e)))?;
                files.push((name, bytes));
            }
            _ => {}
        }
    }

    RequestValidator::password(&password, &state.upload_password)?;
    let class = RequestValidator::device_class(device_type.as_deref())?;
    RequestValidator::upload_batch(files.len())?;
    for (name, _) in &files {
        RequestValidator::image_file_name(name)?;
    }

    let images = state.catalog.images();
    let mut urls = Vec::with_capacity(files.len());
    for (name, bytes) in &files {
        images.put(class, name, bytes).await?;
        state.catalog.add_item(class, name).await?;
        urls.push(state.catalog.image_url(class, name));
    }

    info!(device = %class, count = urls.len(), "Uploaded images");
    Ok(ApiResponse::success("Files uploaded successfully", urls))
}

async fn field_text(field: axum::extract::multipart::Field<'_>) -> Result<String> {
    field
        .text()
        .await
        .map_err(|e| Error::InvalidRequest(format!("Malformed multipart field: {}", e)))
}

/// Delete one image and drop it from both lists
pub async fn delete(
    State(state): State<AppState>,
    body: std::result::Result<Json<DeleteRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(req) = body.map_err(|e| {
        warn!(error = %e, "Rejected delete body");
        Error::InvalidRequest(
            "Invalid request parameters. Please check deviceType, fileName, and password.".to_string(),
        )
    })?;
    req.validate()?;

    RequestValidator::password(&req.password, &state.upload_password)?;
    let class = RequestValidator::device_class(Some(&req.device_type))?;
    RequestValidator::image_file_name(&req.file_name)?;

    let existed = state.catalog.images().delete(class, &req.file_name).await?;
    let removed = state.catalog.remove_item(class, &req.file_name).await?;

    info!(device = %class, image = %req.file_name, existed, removed, "Deleted image");
    Ok(ApiResponse::success_no_data("Image deleted successfully"))
}

pub async fn select_images(
    State(state): State<AppState>,
    Query(query): Query<SelectQuery>,
) -> Result<impl IntoResponse> {
    let class = RequestValidator::device_class(query.device_type.as_deref())?;
    let urls = state.catalog.list_urls(class).await?;
    Ok(ApiResponse::success("Wallpapers retrieved successfully", urls))
}

pub async fn fallback() -> impl IntoResponse {
    ApiResponse::<()>::error_no_detail(
        StatusCode::NOT_FOUND,
        "The page or route you requested does not exist",
    )
}
