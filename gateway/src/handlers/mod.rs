use axum::http::Uri;

use crate::error::GatewayError;

pub mod health;
pub mod invoke;

/// Fallback for paths no method is declared on
pub async fn not_found(uri: Uri) -> GatewayError {
    GatewayError::NotFound(uri.path().to_string())
}
