//! Error handling for the REST API server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sluice_core::SluiceError;
use std::fmt;
use tracing::error;

/// API error type.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    // Common error constructors
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Field validation failures are client errors.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.status, self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            success: false,
            error: ErrorBody {
                code: self.code,
                message: self.message,
                details: self.details,
            },
        };

        (self.status, Json(body)).into_response()
    }
}

// Convert from sluice-core errors
impl From<SluiceError> for ApiError {
    fn from(err: SluiceError) -> Self {
        match err {
            SluiceError::Validation { message, fields } => {
                let details = serde_json::to_value(&fields).unwrap_or_default();
                ApiError::validation(message).with_details(details)
            }
            SluiceError::Configuration(msg) => ApiError::bad_request(msg),
            other => {
                error!(code = other.code().as_str(), error = %other, "Request failed");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    other.code().as_str(),
                    other.to_string(),
                )
            }
        }
    }
}

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::FieldError;

    #[test]
    fn test_validation_maps_to_bad_request() {
        let err = SluiceError::validation(vec![
            FieldError::new("name", "Name is required"),
            FieldError::new("event", "Event must be INSERT, UPDATE, or DELETE"),
        ]);
        let api: ApiError = err.into();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert_eq!(api.code, "VALIDATION_ERROR");
        let details = api.details.unwrap();
        assert_eq!(details[0]["field"], "name");
        assert_eq!(details[1]["message"], "Event must be INSERT, UPDATE, or DELETE");
    }

    #[test]
    fn test_store_maps_to_internal() {
        let api: ApiError = SluiceError::store("disk full").into();
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.code, "STORE_001");
    }
}
