//! Error types for sluice operations.
//!
//! The variants follow the failure classes of the dispatcher: malformed
//! listener input, store failures, delivery failures and change-feed
//! failures. Each variant carries a stable [`ErrorCode`] for programmatic
//! handling by the management surface.

use serde::Serialize;
use thiserror::Error;

/// Result type alias for sluice operations.
pub type SluiceResult<T> = Result<T, SluiceError>;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Name of the offending field.
    pub field: String,
    /// Human readable message.
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Main error type for all sluice operations.
#[derive(Error, Debug)]
pub enum SluiceError {
    /// Listener input failed validation.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        fields: Vec<FieldError>,
    },

    /// Configuration store or log sink failed.
    #[error("Store error: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A change feed could not be opened or broke down.
    #[error("Subscription error on table '{table}': {message}")]
    Subscription { table: String, message: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValInvalidInput,
    StoreOperationFailed,
    SubscriptionFailed,
    Configuration,
    Io,
    ParseInvalidJson,
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValInvalidInput => "VAL_001",
            ErrorCode::StoreOperationFailed => "STORE_001",
            ErrorCode::SubscriptionFailed => "SUB_001",
            ErrorCode::Configuration => "CFG_001",
            ErrorCode::Io => "IO_001",
            ErrorCode::ParseInvalidJson => "PARSE_001",
            ErrorCode::Internal => "INT_001",
        }
    }
}

impl SluiceError {
    /// Create a validation error from a list of failing fields.
    pub fn validation(fields: Vec<FieldError>) -> Self {
        let message = fields
            .iter()
            .map(|f| f.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        Self::Validation { message, fields }
    }

    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            source: None,
        }
    }

    /// Create a subscription error for a table.
    pub fn subscription(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subscription {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::ValInvalidInput,
            Self::Store { .. } => ErrorCode::StoreOperationFailed,
            Self::Subscription { .. } => ErrorCode::SubscriptionFailed,
            Self::Configuration(_) => ErrorCode::Configuration,
            Self::Io(_) => ErrorCode::Io,
            Self::Serialization(_) => ErrorCode::ParseInvalidJson,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Field errors when this is a validation failure.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Validation { fields, .. } => fields,
            _ => &[],
        }
    }
}

impl From<rusqlite::Error> for SluiceError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<tokio::task::JoinError> for SluiceError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Background task failed: {}", err))
    }
}
