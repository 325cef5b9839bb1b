use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::HealthResponse;
use crate::AppState;

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Server is running".to_string(),
    })
}

/// Readiness check endpoint. Not ready once the admission or drain worker
/// has stopped.
pub async fn ready_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    debug!("Readiness check requested");
    if state.coordinator.is_accepting() {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
                message: "Service is ready".to_string(),
            }),
        )
    } else {
        warn!("Readiness check failed: collaboration workers stopped");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unavailable".to_string(),
                message: "Collaboration workers are not running".to_string(),
            }),
        )
    }
}
