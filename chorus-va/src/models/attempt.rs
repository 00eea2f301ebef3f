//! Analysis attempts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{JobStatus, ScoreBreakdown, Section, SectionScore};

/// One scored (or failed) recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisAttempt {
    pub attempt_id: Uuid,
    pub user_id: String,
    pub song_id: String,
    pub voice_part: String,
    pub recording_ref: String,
    pub status: JobStatus,

    /// Reference row the attempt was scored against
    pub reference_id: Option<Uuid>,

    /// Section boundaries supplied with the request
    pub sections_override: Option<Vec<Section>>,

    pub scores: Option<ScoreBreakdown>,
    pub tips: Option<Vec<String>>,

    /// "<stage>: <message>"
    pub error_message: Option<String>,
    pub error_kind: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisAttempt {
    /// New PENDING attempt
    pub fn new(
        user_id: &str,
        song_id: &str,
        voice_part: &str,
        recording_ref: &str,
        sections_override: Option<Vec<Section>>,
    ) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            song_id: song_id.to_string(),
            voice_part: voice_part.to_string(),
            recording_ref: recording_ref.to_string(),
            status: JobStatus::Pending,
            reference_id: None,
            sections_override,
            scores: None,
            tips: None,
            error_message: None,
            error_kind: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Caller-facing view
    pub fn to_status(&self) -> AttemptStatus {
        AttemptStatus {
            attempt_id: self.attempt_id,
            user_id: self.user_id.clone(),
            song_id: self.song_id.clone(),
            voice_part: self.voice_part.clone(),
            status: self.status,
            scores: self.scores.as_ref().map(|s| OverallScores {
                pitch: s.pitch,
                timing: s.timing,
                dynamics: s.dynamics,
                overall: s.overall,
            }),
            sections: self.scores.as_ref().map(|s| s.sections.clone()),
            tips: self.tips.clone(),
            error: self.error_message.clone(),
            error_kind: self.error_kind.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// The four headline scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallScores {
    pub pitch: f64,
    pub timing: f64,
    pub dynamics: f64,
    pub overall: f64,
}

/// Status document returned by `get_status` and `GET /analyses/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptStatus {
    pub attempt_id: Uuid,
    pub user_id: String,
    pub song_id: String,
    pub voice_part: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scores: Option<OverallScores>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sections: Option<Vec<SectionScore>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tips: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}
