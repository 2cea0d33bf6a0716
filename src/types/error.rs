//! Error types for Archway

use hyper::StatusCode;

/// Main error type for Archway operations
#[derive(Debug, thiserror::Error)]
pub enum ArchwayError {
    #[error("Bad request: {0}")]
    MalformedBody(String),

    #[error("doc_ID is taken")]
    DuplicateId,

    #[error("Schema validation failed: {0}")]
    SchemaInvalid(String),

    #[error("No signer registered for doc_version '{0}'")]
    UnsupportedSignerVersion(String),

    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{0}")]
    InvalidTimeRange(String),

    #[error("Page must be a valid integer")]
    InvalidPage,

    #[error("Store conflict: {0}")]
    StoreConflict(String),

    #[error("Store not available: {0}")]
    StoreUnavailable(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ArchwayError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedBody(_) => StatusCode::BAD_REQUEST,
            // Validation-class failures are reported in the response body
            // with HTTP 200, matching the registry wire contract.
            Self::DuplicateId => StatusCode::OK,
            Self::SchemaInvalid(_) => StatusCode::OK,
            Self::UnsupportedSignerVersion(_) => StatusCode::OK,
            Self::SignatureInvalid(_) => StatusCode::OK,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::InvalidTimeRange(_) => StatusCode::BAD_REQUEST,
            Self::InvalidPage => StatusCode::BAD_REQUEST,
            Self::StoreConflict(_) => StatusCode::CONFLICT,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this failure belongs to the validation class: caught at the
    /// request boundary and returned as `{"OK": false, "msg": ...}` rather
    /// than an HTTP error status.
    pub fn is_validation_failure(&self) -> bool {
        matches!(
            self,
            Self::DuplicateId
                | Self::SchemaInvalid(_)
                | Self::UnsupportedSignerVersion(_)
                | Self::SignatureInvalid(_)
        )
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for ArchwayError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ArchwayError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedBody(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for ArchwayError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<reqwest::Error> for ArchwayError {
    fn from(err: reqwest::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for ArchwayError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Unauthorized(format!("JWT error: {}", err))
    }
}

/// Result type alias for Archway operations
pub type Result<T> = std::result::Result<T, ArchwayError>;
