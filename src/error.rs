use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::device::DeviceClass;
use crate::response::ApiResponse;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid device type '{0}'")]
    InvalidDeviceClass(String),

    #[error("Authentication failed")]
    Unauthorized,

    /// The source list for the class has no entries to refill from.
    #[error("No items available for device type {0}")]
    SourceEmpty(DeviceClass),

    /// Waited for another worker's refill and still found nothing.
    #[error("Timed out waiting for refill of device type {0}")]
    RefillTimeout(DeviceClass),

    #[error("Timed out waiting for an item of device type {0}")]
    PopTimeout(DeviceClass),

    #[error("Rescan already in progress for device type {0}")]
    RescanInProgress(DeviceClass),

    #[error("Backing store error: {0}")]
    BackingStore(String),

    #[error("Image store error: {0}")]
    ImageStore(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Bounded waits that the immediate caller may retry once.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::PopTimeout(_) | Error::RefillTimeout(_))
    }

    /// Outcomes rendered to clients as "no item available".
    pub fn is_no_item(&self) -> bool {
        matches!(
            self,
            Error::SourceEmpty(_) | Error::PopTimeout(_) | Error::RefillTimeout(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidRequest(_) | Error::InvalidDeviceClass(_) | Error::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::SourceEmpty(_) | Error::RefillTimeout(_) | Error::PopTimeout(_) => {
                StatusCode::NOT_FOUND
            }
            Error::RescanInProgress(_) => StatusCode::CONFLICT,
            Error::Config(_)
            | Error::BackingStore(_)
            | Error::ImageStore(_)
            | Error::Io(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Error::Config(_) => "configuration_error",
            Error::InvalidRequest(_) => "bad_request",
            Error::InvalidDeviceClass(_) => "invalid device type",
            Error::Unauthorized => "invalid password",
            Error::SourceEmpty(_) | Error::RefillTimeout(_) | Error::PopTimeout(_) => {
                "no wallpaper found"
            }
            Error::RescanInProgress(_) => "rescan_in_progress",
            Error::Validation(_) => "invalid parameters",
            Error::BackingStore(_)
            | Error::ImageStore(_)
            | Error::Io(_)
            | Error::Internal(_) => "server error",
        }
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::BackingStore(err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        // Internal details stay in the logs.
        let message = if status.is_server_error() {
            "An internal error occurred while processing the request".to_string()
        } else if self.is_no_item() {
            "No wallpapers are available right now".to_string()
        } else {
            self.to_string()
        };

        ApiResponse::<()>::error(status, self.label(), message).into_response()
    }
}
