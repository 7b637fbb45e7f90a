use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Envelope shared by every JSON endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: u16,
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            status: "success".to_string(),
            message: message.into(),
            error: None,
            data: Some(data),
        }
    }

    pub fn error(status: StatusCode, error: &str, message: impl Into<String>) -> Self {
        Self {
            code: status.as_u16(),
            status: "error".to_string(),
            message: message.into(),
            error: Some(error.to_string()),
            data: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn success_no_data(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            status: "success".to_string(),
            message: message.into(),
            error: None,
            data: None,
        }
    }

    pub fn error_no_detail(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code: status.as_u16(),
            status: "error".to_string(),
            message: message.into(),
            error: None,
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}
