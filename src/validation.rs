use serde::Deserialize;
use subtle::ConstantTimeEq;
use validator::Validate;

use crate::device::DeviceClass;
use crate::error::{Error, Result};
use crate::image_store::is_image_name;

pub const MAX_UPLOAD_FILES: usize = 5;

/// Body of a delete request.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    #[validate(length(min = 1, message = "deviceType is required"))]
    pub device_type: String,
    #[validate(length(min = 1, max = 255, message = "fileName is required"))]
    pub file_name: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

/// Request validation utilities
pub struct RequestValidator;

impl RequestValidator {
    /// Parse a device type query or form value. Missing counts as invalid.
    pub fn device_class(raw: Option<&str>) -> Result<DeviceClass> {
        raw.unwrap_or_default().trim().parse()
    }

    /// Validates that an uploaded or deleted file is a bare image name
    pub fn image_file_name(name: &str) -> Result<()> {
        if !is_image_name(name) {
            return Err(Error::InvalidRequest(format!(
                "The file '{}' is not a valid image type.",
                name
            )));
        }
        Ok(())
    }

    pub fn upload_batch(count: usize) -> Result<()> {
        if count == 0 {
            return Err(Error::InvalidRequest(
                "Please upload at least one image file.".to_string(),
            ));
        }
        if count > MAX_UPLOAD_FILES {
            return Err(Error::InvalidRequest(format!(
                "You can upload a maximum of {} images.",
                MAX_UPLOAD_FILES
            )));
        }
        Ok(())
    }

    /// Check the shared upload secret. An unset secret rejects everyone.
    pub fn password(provided: &str, expected: &str) -> Result<()> {
        if expected.is_empty() || !bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
            return Err(Error::Unauthorized);
        }
        Ok(())
    }
}
