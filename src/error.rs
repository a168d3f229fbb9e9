//! Lifecycle error taxonomy and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors produced by the lifecycle engine.
///
/// The taxonomy drives retry behavior: `TransientStore` is retried with
/// bounded backoff, `ResourceBusy` is retried on the next cycle, and
/// `IntegrityViolation` is always fatal and never retried.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Transient store error: {0}")]
    TransientStore(String),

    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using LifecycleError
pub type Result<T> = std::result::Result<T, LifecycleError>;

impl LifecycleError {
    /// Whether the operation may be retried with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, LifecycleError::TransientStore(_))
    }

    /// Whether the error must abort with no partial effect and never retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LifecycleError::IntegrityViolation(_))
    }

    /// Error category label for operation histories.
    pub fn category(&self) -> &'static str {
        match self {
            LifecycleError::InvalidPolicy(_) => "invalid_policy",
            LifecycleError::NotFound(_) => "not_found",
            LifecycleError::InvalidQuery(_) => "invalid_query",
            LifecycleError::TransientStore(_) => "transient_store",
            LifecycleError::IntegrityViolation(_) => "integrity_violation",
            LifecycleError::ResourceBusy(_) => "resource_busy",
            LifecycleError::Internal(_) => "internal",
        }
    }

    /// Render a summary safe for operator-visible history entries.
    ///
    /// Never includes filesystem paths or connection strings; the detail
    /// message is sanitized down to its first line with path-like tokens
    /// masked.
    pub fn safe_summary(&self) -> String {
        let detail = match self {
            LifecycleError::InvalidPolicy(m)
            | LifecycleError::NotFound(m)
            | LifecycleError::InvalidQuery(m)
            | LifecycleError::TransientStore(m)
            | LifecycleError::IntegrityViolation(m)
            | LifecycleError::ResourceBusy(m)
            | LifecycleError::Internal(m) => m,
        };
        let line = detail.lines().next().unwrap_or("");
        let masked: String = line
            .split_whitespace()
            .map(|word| {
                if word.contains('/') || word.contains("://") {
                    "<redacted>"
                } else {
                    word
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        format!("{}: {}", self.category(), masked)
    }
}

impl IntoResponse for LifecycleError {
    fn into_response(self) -> Response {
        let status = match &self {
            LifecycleError::InvalidPolicy(_) | LifecycleError::InvalidQuery(_) => {
                StatusCode::BAD_REQUEST
            }
            LifecycleError::NotFound(_) => StatusCode::NOT_FOUND,
            LifecycleError::ResourceBusy(_) => StatusCode::CONFLICT,
            LifecycleError::IntegrityViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LifecycleError::TransientStore(_) | LifecycleError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string(),
            "category": self.category(),
            "code": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for LifecycleError {
    fn from(err: sqlx::Error) -> Self {
        LifecycleError::TransientStore(err.to_string())
    }
}

impl From<std::io::Error> for LifecycleError {
    fn from(err: std::io::Error) -> Self {
        LifecycleError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for LifecycleError {
    fn from(err: serde_json::Error) -> Self {
        LifecycleError::Internal(err.to_string())
    }
}

impl From<zip::result::ZipError> for LifecycleError {
    fn from(err: zip::result::ZipError) -> Self {
        LifecycleError::Internal(err.to_string())
    }
}
