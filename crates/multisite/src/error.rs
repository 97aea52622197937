//! Error types and their HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use multisite_shared::StoreError;
use serde_json::json;

use crate::context::ContextError;

/// Errors raised by the host-routing layer
#[derive(Debug, thiserror::Error)]
pub enum MultisiteError {
    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid host: {0:?}")]
    InvalidHost(String),
    #[error("Disallowed host: {0}")]
    DisallowedHost(String),

    // Resource errors
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Ambiguous: {0}")]
    Ambiguous(String),

    // Configuration errors
    #[error("Improperly configured: {0}")]
    Config(String),

    // Backend errors
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Cache error: {0}")]
    Cache(String),
    #[error("Public suffix list error: {0}")]
    SuffixList(String),
}

impl From<ContextError> for MultisiteError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::DoesNotExist(domain) => {
                MultisiteError::NotFound(format!("no site with domain {domain:?}"))
            }
            ContextError::InvalidDefault(msg) => MultisiteError::Config(msg),
            ContextError::Unset => MultisiteError::NotFound("site context is unset".to_string()),
            ContextError::Store(err) => MultisiteError::Store(err),
        }
    }
}

impl From<redis::RedisError> for MultisiteError {
    fn from(err: redis::RedisError) -> Self {
        MultisiteError::Cache(err.to_string())
    }
}

impl MultisiteError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            MultisiteError::Validation(_) => StatusCode::BAD_REQUEST,
            MultisiteError::DisallowedHost(_) => StatusCode::BAD_REQUEST,
            MultisiteError::InvalidHost(_) => StatusCode::NOT_FOUND,
            MultisiteError::NotFound(_) => StatusCode::NOT_FOUND,
            MultisiteError::Ambiguous(_) => StatusCode::CONFLICT,
            MultisiteError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            MultisiteError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
            MultisiteError::Store(StoreError::Database(_))
            | MultisiteError::Config(_)
            | MultisiteError::Cache(_)
            | MultisiteError::SuffixList(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            MultisiteError::Validation(_) => "VALIDATION_ERROR",
            MultisiteError::InvalidHost(_) => "INVALID_HOST",
            MultisiteError::DisallowedHost(_) => "DISALLOWED_HOST",
            MultisiteError::NotFound(_) => "NOT_FOUND",
            MultisiteError::Ambiguous(_) => "AMBIGUOUS",
            MultisiteError::Config(_) => "IMPROPERLY_CONFIGURED",
            MultisiteError::Store(StoreError::NotFound(_)) => "NOT_FOUND",
            MultisiteError::Store(StoreError::Conflict(_)) => "CONFLICT",
            MultisiteError::Store(StoreError::Database(_)) => "DATABASE_ERROR",
            MultisiteError::Cache(_) => "CACHE_ERROR",
            MultisiteError::SuffixList(_) => "PUBLIC_SUFFIX_LIST_ERROR",
        }
    }
}

impl IntoResponse for MultisiteError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Backend details stay in the logs
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type alias for multisite operations
pub type MultisiteResult<T> = Result<T, MultisiteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            MultisiteError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            MultisiteError::InvalidHost(String::new()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            MultisiteError::Validation("dup".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            MultisiteError::Ambiguous("two".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            MultisiteError::Store(StoreError::Database("down".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_context_error_conversion() {
        let err: MultisiteError = ContextError::DoesNotExist("example.org".into()).into();
        assert!(matches!(err, MultisiteError::NotFound(_)));

        let err: MultisiteError = ContextError::InvalidDefault("a".into()).into();
        assert!(matches!(err, MultisiteError::Config(_)));
    }
}
