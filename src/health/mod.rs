/*!
 * # Health Check Module
 *
 * - Basic health check (`/health`) - Simple up/down status
 * - Readiness check (`/health/ready`) - Verifies the order store is reachable
 * - Version (`/health/version`) - Build information
 */

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::AppState;

/// Basic health status
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    Down,
}

/// Returns build and version information
pub async fn version_info() -> impl IntoResponse {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "commit": option_env!("GIT_HASH").unwrap_or("unknown"),
    }))
}

/// Simple health check response that doesn't touch dependencies
pub async fn health_check() -> impl IntoResponse {
    debug!("Health check endpoint called");

    (
        StatusCode::OK,
        Json(json!({
            "status": HealthStatus::Up,
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

/// Readiness check; with a database backend the connection must answer.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let status = match &state.db {
        Some(db) => match crate::db::check_connection(db).await {
            Ok(()) => HealthStatus::Up,
            Err(e) => {
                warn!(error = %e, "Readiness check failed");
                HealthStatus::Down
            }
        },
        None => HealthStatus::Up,
    };

    let status_code = match status {
        HealthStatus::Up => StatusCode::OK,
        HealthStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        status_code,
        Json(json!({
            "ready": status == HealthStatus::Up,
            "storage": state.config.storage_backend,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

/// Creates router with health check endpoints
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/version", get(version_info))
}
