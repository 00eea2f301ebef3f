//! chorus-va library interface
//!
//! Vocal performance analysis: reference preparation, feature extraction,
//! DTW alignment, scoring and coaching, behind a job queue and a small HTTP
//! API. Exposed as a library for integration tests and embedding.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{AnalysisError, ApiError, ApiResult};
pub use crate::services::AnalysisService;

use axum::Router;
use chorus_common::events::EventBus;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub event_bus: EventBus,
    pub service: AnalysisService,
    /// Service startup timestamp for uptime reporting
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, service: AnalysisService) -> Self {
        Self {
            db,
            event_bus,
            service,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::reference_routes())
        .merge(api::analysis_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
