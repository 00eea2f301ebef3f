//! Analysis endpoints
//!
//! POST /analyses, GET /analyses/:id, GET /users/:user_id/analyses

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    models::{AttemptStatus, JobStatus, Section},
    AppState,
};

/// POST /analyses request
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub user_id: String,
    pub song_id: String,
    pub voice_part: String,
    pub recording_ref: String,
    #[serde(default)]
    pub sections: Option<Vec<Section>>,
}

/// POST /analyses response
#[derive(Debug, Serialize, Deserialize)]
pub struct AnalysisAccepted {
    pub attempt_id: Uuid,
    pub status: JobStatus,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

/// GET /users/:user_id/analyses response
#[derive(Debug, Serialize)]
pub struct AttemptList {
    pub user_id: String,
    pub attempts: Vec<AttemptStatus>,
}

/// POST /analyses
///
/// Queues the recording and returns 202 immediately; poll
/// `GET /analyses/:id` or listen on `/events` for the outcome.
pub async fn submit_analysis(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<(StatusCode, Json<AnalysisAccepted>)> {
    let attempt_id = state
        .service
        .analyze(
            &request.user_id,
            &request.song_id,
            &request.voice_part,
            &request.recording_ref,
            request.sections,
        )
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(AnalysisAccepted {
            attempt_id,
            status: JobStatus::Pending,
        }),
    ))
}

/// GET /analyses/:id
pub async fn get_analysis(
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
) -> ApiResult<Json<AttemptStatus>> {
    state
        .service
        .get_status(attempt_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Analysis {}", attempt_id)))
}

/// GET /users/:user_id/analyses
pub async fn list_user_analyses(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<AttemptList>> {
    if query.limit == 0 {
        return Err(ApiError::BadRequest("limit must be > 0".to_string()));
    }
    let attempts = state.service.list_attempts(&user_id, query.limit).await?;
    Ok(Json(AttemptList { user_id, attempts }))
}

pub fn analysis_routes() -> Router<AppState> {
    Router::new()
        .route("/analyses", post(submit_analysis))
        .route("/analyses/:id", get(get_analysis))
        .route("/users/:user_id/analyses", get(list_user_analyses))
}
