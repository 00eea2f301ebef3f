//! Prepared reference feature sets
//!
//! One row per (song, voice part) that is not FAILED. Preparation (isolation
//! plus extraction) runs once per row; attempts only read the stored features.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{JobStatus, Section};

/// Persisted reference preparation record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceFeatureSet {
    pub reference_id: Uuid,
    pub song_id: String,
    pub voice_part: String,
    pub status: JobStatus,

    /// Artifact reference of the mixed or a-cappella source track
    pub source_track_ref: String,

    /// Whether the source needs vocal isolation before extraction
    pub needs_isolation: bool,

    /// Isolated vocal stem, when isolation ran and succeeded
    pub isolated_audio_ref: Option<String>,

    /// Serialized FeatureSequence artifact
    pub features_ref: Option<String>,

    pub source_duration_ms: Option<u64>,

    /// Separation model used ("none" when no isolation was needed)
    pub isolation_model_id: Option<String>,

    /// Isolation failed and the unseparated mix was used instead
    pub isolation_degraded: bool,

    /// Section boundaries; equal partition at scoring time when absent
    pub sections: Option<Vec<Section>>,

    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReferenceFeatureSet {
    /// New PENDING record
    pub fn new(
        song_id: &str,
        voice_part: &str,
        source_track_ref: &str,
        needs_isolation: bool,
        sections: Option<Vec<Section>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            reference_id: Uuid::new_v4(),
            song_id: song_id.to_string(),
            voice_part: voice_part.to_string(),
            status: JobStatus::Pending,
            source_track_ref: source_track_ref.to_string(),
            needs_isolation,
            isolated_audio_ref: None,
            features_ref: None,
            source_duration_ms: None,
            isolation_model_id: None,
            isolation_degraded: false,
            sections,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Outcome of a successful preparation, written with the READY status
#[derive(Debug, Clone)]
pub struct PreparedReference {
    pub features_ref: String,
    pub isolated_audio_ref: Option<String>,
    pub isolation_model_id: String,
    pub isolation_degraded: bool,
    pub source_duration_ms: u64,
}
