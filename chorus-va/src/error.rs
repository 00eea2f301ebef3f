//! Error types for chorus-va
//!
//! `ApiError` is the HTTP-facing error (JSON `{error: {code, message}}`).
//! `AnalysisError` is the pipeline taxonomy recorded on failed jobs.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// chorus-common error
    #[error("Common error: {0}")]
    Common(#[from] chorus_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Common(chorus_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Common(chorus_common::Error::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
            }
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Pipeline error taxonomy
///
/// Every variant carries a stable kind string persisted on the failed row
/// and a flag telling whether the message is meant for the singer.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnalysisError {
    /// Audio could not be decoded or is too short
    #[error("{0}")]
    Decode(String),

    /// Every analysis window is below the noise floor
    #[error("{0}")]
    Silence(String),

    /// Vocal isolation failed
    #[error("{0}")]
    Separation(String),

    /// Sequences cannot be aligned
    #[error("{0}")]
    Alignment(String),

    /// Storage, IO or internal failure
    #[error("{0}")]
    Pipeline(String),
}

impl AnalysisError {
    /// Stable kind string stored in `error_kind`
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::Decode(_) => "DECODE_ERROR",
            AnalysisError::Silence(_) => "SILENCE_ERROR",
            AnalysisError::Separation(_) => "SEPARATION_ERROR",
            AnalysisError::Alignment(_) => "ALIGNMENT_ERROR",
            AnalysisError::Pipeline(_) => "PIPELINE_ERROR",
        }
    }

    /// Whether the singer can act on this error (re-record, sing louder...)
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            AnalysisError::Decode(_) | AnalysisError::Silence(_) | AnalysisError::Alignment(_)
        )
    }
}

impl From<chorus_common::Error> for AnalysisError {
    fn from(err: chorus_common::Error) -> Self {
        AnalysisError::Pipeline(err.to_string())
    }
}

impl From<sqlx::Error> for AnalysisError {
    fn from(err: sqlx::Error) -> Self {
        AnalysisError::Pipeline(format!("Database error: {}", err))
    }
}

impl From<std::io::Error> for AnalysisError {
    fn from(err: std::io::Error) -> Self {
        AnalysisError::Pipeline(format!("IO error: {}", err))
    }
}
