//! Reference preparation endpoints
//!
//! POST /references, GET /references/:id, POST /references/reprocess

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    models::{JobStatus, ReferenceFeatureSet, Section},
    AppState,
};

/// POST /references request
#[derive(Debug, Deserialize)]
pub struct PrepareReferenceRequest {
    pub song_id: String,
    pub voice_part: String,
    pub source_track_ref: String,
    /// False when the source is already an a-cappella vocal line
    #[serde(default = "default_needs_isolation")]
    pub needs_isolation: bool,
    #[serde(default)]
    pub sections: Option<Vec<Section>>,
}

fn default_needs_isolation() -> bool {
    true
}

/// POST /references/reprocess request
#[derive(Debug, Deserialize)]
pub struct ReprocessRequest {
    pub song_id: String,
    pub voice_part: String,
}

/// Accepted response for both POST endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ReferenceAccepted {
    pub reference_id: Uuid,
    pub status: JobStatus,
}

impl From<&ReferenceFeatureSet> for ReferenceAccepted {
    fn from(reference: &ReferenceFeatureSet) -> Self {
        Self {
            reference_id: reference.reference_id,
            status: reference.status,
        }
    }
}

/// POST /references
///
/// Idempotent per (song_id, voice_part): returns the live reference when one
/// exists, otherwise schedules a new preparation.
pub async fn prepare_reference(
    State(state): State<AppState>,
    Json(request): Json<PrepareReferenceRequest>,
) -> ApiResult<(StatusCode, Json<ReferenceAccepted>)> {
    let reference = state
        .service
        .prepare_reference(
            &request.song_id,
            &request.voice_part,
            &request.source_track_ref,
            request.needs_isolation,
            request.sections,
        )
        .await?;

    Ok((StatusCode::ACCEPTED, Json(ReferenceAccepted::from(&reference))))
}

/// GET /references/:id
pub async fn get_reference(
    State(state): State<AppState>,
    Path(reference_id): Path<Uuid>,
) -> ApiResult<Json<ReferenceFeatureSet>> {
    state
        .service
        .get_reference(reference_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Reference {}", reference_id)))
}

/// POST /references/reprocess
pub async fn reprocess_reference(
    State(state): State<AppState>,
    Json(request): Json<ReprocessRequest>,
) -> ApiResult<(StatusCode, Json<ReferenceAccepted>)> {
    let reference = state
        .service
        .force_reprocess(&request.song_id, &request.voice_part)
        .await?;

    tracing::info!(
        reference_id = %reference.reference_id,
        song_id = %request.song_id,
        voice_part = %request.voice_part,
        "Reference reprocess scheduled"
    );
    Ok((StatusCode::ACCEPTED, Json(ReferenceAccepted::from(&reference))))
}

pub fn reference_routes() -> Router<AppState> {
    Router::new()
        .route("/references", post(prepare_reference))
        .route("/references/reprocess", post(reprocess_reference))
        .route("/references/:id", get(get_reference))
}
