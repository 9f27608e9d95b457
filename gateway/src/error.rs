use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Gateway error types
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Route not found: {0}")]
    NotFound(String),

    #[error("Compute unit failed: {0}")]
    ComputeFailed(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Table error: {0}")]
    Table(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GatewayErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl GatewayError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden => StatusCode::FORBIDDEN,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::ComputeFailed(_) => StatusCode::BAD_GATEWAY,
            GatewayError::AccessDenied(_) | GatewayError::Table(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Configuration(_) | GatewayError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get error code for the error type
    pub fn error_code(&self) -> &str {
        match self {
            GatewayError::Unauthorized => "UNAUTHORIZED",
            GatewayError::Forbidden => "FORBIDDEN",
            GatewayError::NotFound(_) => "NOT_FOUND",
            GatewayError::ComputeFailed(_) => "COMPUTE_FAILED",
            GatewayError::AccessDenied(_) => "ACCESS_DENIED",
            GatewayError::Table(_) => "TABLE_ERROR",
            GatewayError::Configuration(_) => "CONFIGURATION_ERROR",
            GatewayError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_response = GatewayErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<authz::error::AuthzError> for GatewayError {
    fn from(err: authz::error::AuthzError) -> Self {
        GatewayError::InternalError(err.to_string())
    }
}

impl From<stack::StackError> for GatewayError {
    fn from(err: stack::StackError) -> Self {
        GatewayError::Configuration(err.to_string())
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(GatewayError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(GatewayError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            GatewayError::ComputeFailed("boom".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::NotFound("/nope".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(GatewayError::Forbidden.error_code(), "FORBIDDEN");
        assert_eq!(
            GatewayError::AccessDenied("x".to_string()).error_code(),
            "ACCESS_DENIED"
        );
    }
}
