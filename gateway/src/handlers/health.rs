use axum::{extract::State, Json};
use chrono::Utc;
use tracing::info;

use crate::{
    models::{HealthResponse, RouteInfo},
    AppState,
};

/// Health check endpoint
///
/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    info!("Health check requested");

    let routes = state
        .graph
        .methods()
        .map(|(_, method)| RouteInfo {
            method: method.http_method.to_string(),
            path: method.path.clone(),
            function: method.function.clone(),
            scopes: method.authorization_scopes.clone(),
        })
        .collect();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        stack: state.graph.stack_name().to_string(),
        routes,
    })
}
