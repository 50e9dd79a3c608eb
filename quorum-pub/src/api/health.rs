//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok")
    pub status: String,
    /// Module name ("quorum-pub")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Campaigns currently locked by a publication run
    pub publications_running: i64,
    /// Last background run error, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
///
/// Always answers; a database failure only shows up in `last_error`.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let mut last_error = state.last_error.read().await.clone();
    let publications_running = match crate::db::locks::count_locks(&state.db).await {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to count running publications");
            last_error = Some(e.to_string());
            0
        }
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "quorum-pub".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        publications_running,
        last_error,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
