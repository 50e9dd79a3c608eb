//! Publication API handlers
//!
//! POST /campaigns/{id}/publications, GET /processes/{id}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::PublicationConfig;
use crate::error::{ApiError, ApiResult};
use crate::models::{LogEntry, ProcessState};
use crate::AppState;

/// POST /campaigns/{id}/publications response
#[derive(Debug, Serialize)]
pub struct StartPublicationResponse {
    pub process_id: Uuid,
    pub campaign_id: Uuid,
}

/// GET /processes/{id} response
#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub id: Uuid,
    pub name: String,
    pub mode: String,
    pub state: ProcessState,
    pub project_id: Uuid,
    pub configuration: serde_json::Value,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
    pub logs: Vec<LogEntry>,
}

/// POST /campaigns/{id}/publications
///
/// Start a publication run. Returns 202 Accepted with the process ID; the
/// run itself goes on in the background.
pub async fn start_publication(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
    Json(config): Json<PublicationConfig>,
) -> ApiResult<(StatusCode, Json<StartPublicationResponse>)> {
    let run = state.coordinator.start(campaign_id, config).await?;
    let process_id = run.process_id;

    tracing::info!(
        process_id = %process_id,
        campaign_id = %campaign_id,
        "Publication run started"
    );

    let coordinator = state.coordinator.clone();
    let last_error = state.last_error.clone();
    tokio::spawn(async move {
        let error = match coordinator.execute(run).await {
            Ok(report) => report.error,
            Err(e) => Some(e.to_string()),
        };

        if let Some(error) = error {
            tracing::error!(
                process_id = %process_id,
                error = %error,
                "Publication run failed"
            );
            *last_error.write().await = Some(error);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(StartPublicationResponse {
            process_id,
            campaign_id,
        }),
    ))
}

/// GET /processes/{id}
///
/// State, timestamps and decoded log of a publication process.
pub async fn get_process(
    State(state): State<AppState>,
    Path(process_id): Path<Uuid>,
) -> ApiResult<Json<ProcessResponse>> {
    let process = crate::db::processes::load_process(&state.db, process_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Process not found: {}", process_id)))?;

    let logs = process.parsed_logs();

    Ok(Json(ProcessResponse {
        id: process.id,
        name: process.name,
        mode: process.mode,
        state: process.state,
        project_id: process.project_id,
        configuration: process.configuration,
        created: process.created,
        started: process.started,
        ended: process.ended,
        logs,
    }))
}

/// Build publication routes
pub fn publication_routes() -> Router<AppState> {
    Router::new()
        .route("/campaigns/:id/publications", post(start_publication))
        .route("/processes/:id", get(get_process))
}
