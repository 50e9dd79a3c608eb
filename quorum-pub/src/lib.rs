//! quorum-pub library interface
//!
//! Publication engine (aggregation, confidence, corpus calls), its SQLite
//! queries and the HTTP surface, exposed for the binary and for integration
//! tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod publish;
pub mod services;

pub use crate::error::{ApiError, ApiResult, PublishError, PublishResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::publish::PublicationCoordinator;
use crate::services::CorpusApi;
use quorum_common::events::EventBus;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Starts and executes publication runs
    pub coordinator: PublicationCoordinator,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last background run error, for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, client: Arc<dyn CorpusApi>) -> Self {
        let coordinator = PublicationCoordinator::new(db.clone(), client, event_bus.clone());
        Self {
            db,
            event_bus,
            coordinator,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::publication_routes())
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
