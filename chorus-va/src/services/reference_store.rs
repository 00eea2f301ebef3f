//! Reference Store
//!
//! Single writer of `reference_feature_sets`. Every status change is
//! broadcast as a `ReferenceStatusChanged` event.

use chorus_common::events::{ChorusEvent, EventBus};
use chorus_common::{Error, Result};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::references;
use crate::models::{JobStatus, PreparedReference, ReferenceFeatureSet, Section};

/// Error message stored on rows replaced by an operator reprocess
pub const SUPERSEDED_MESSAGE: &str = "superseded by reprocess";

/// Insert races that can still lose after a re-read (winner failed in between)
const MAX_CREATE_ATTEMPTS: usize = 3;

/// Result of `get_or_create`
#[derive(Debug, Clone)]
pub enum GetOrCreate {
    /// A new PENDING row was inserted; the caller schedules preparation
    Created(ReferenceFeatureSet),
    /// A non-FAILED row already existed
    Existing(ReferenceFeatureSet),
}

impl GetOrCreate {
    pub fn reference(&self) -> &ReferenceFeatureSet {
        match self {
            GetOrCreate::Created(r) | GetOrCreate::Existing(r) => r,
        }
    }

    pub fn into_reference(self) -> ReferenceFeatureSet {
        match self {
            GetOrCreate::Created(r) | GetOrCreate::Existing(r) => r,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, GetOrCreate::Created(_))
    }
}

/// Persistent store of prepared reference features
#[derive(Clone)]
pub struct ReferenceStore {
    db: SqlitePool,
    event_bus: EventBus,
}

impl ReferenceStore {
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        Self { db, event_bus }
    }

    /// Return the live reference for (song, voice part) or insert a PENDING one
    ///
    /// Concurrent callers race on the partial unique index; losers re-read
    /// and return the winner's row.
    pub async fn get_or_create(
        &self,
        song_id: &str,
        voice_part: &str,
        source_track_ref: &str,
        needs_isolation: bool,
        sections: Option<Vec<Section>>,
    ) -> Result<GetOrCreate> {
        for _ in 0..MAX_CREATE_ATTEMPTS {
            if let Some(existing) = references::find_active_reference(&self.db, song_id, voice_part).await? {
                debug!(
                    reference_id = %existing.reference_id,
                    status = %existing.status,
                    "Reusing existing reference"
                );
                return Ok(GetOrCreate::Existing(existing));
            }

            let reference = ReferenceFeatureSet::new(
                song_id,
                voice_part,
                source_track_ref,
                needs_isolation,
                sections.clone(),
            );

            match references::insert_reference(&self.db, &reference).await {
                Ok(()) => {
                    info!(
                        reference_id = %reference.reference_id,
                        song_id,
                        voice_part,
                        "Created reference feature set"
                    );
                    self.emit(&reference, JobStatus::Pending, None);
                    return Ok(GetOrCreate::Created(reference));
                }
                Err(e) if e.is_unique_violation() => {
                    debug!(song_id, voice_part, "Lost reference insert race, re-reading");
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Internal(format!(
            "Could not create or find reference for {}/{}",
            song_id, voice_part
        )))
    }

    /// Claim a PENDING reference for preparation
    pub async fn mark_processing(&self, reference_id: Uuid) -> Result<bool> {
        let claimed = references::claim_reference(&self.db, reference_id).await?;
        if claimed {
            self.emit_by_id(reference_id, JobStatus::Processing, None).await;
        }
        Ok(claimed)
    }

    /// Record a successful preparation
    pub async fn mark_ready(&self, reference_id: Uuid, prepared: &PreparedReference) -> Result<bool> {
        let updated = references::complete_reference(&self.db, reference_id, prepared).await?;
        if updated {
            info!(
                reference_id = %reference_id,
                model = %prepared.isolation_model_id,
                degraded = prepared.isolation_degraded,
                duration_ms = prepared.source_duration_ms,
                "Reference READY"
            );
            self.emit_by_id(reference_id, JobStatus::Ready, None).await;
        } else {
            warn!(reference_id = %reference_id, "Reference was no longer preparable, READY not recorded");
        }
        Ok(updated)
    }

    /// Move a reference to FAILED; the key becomes free for a new row
    pub async fn mark_failed(&self, reference_id: Uuid, error: &str) -> Result<bool> {
        let updated = references::fail_reference(&self.db, reference_id, error).await?;
        if updated {
            warn!(reference_id = %reference_id, error, "Reference FAILED");
            self.emit_by_id(reference_id, JobStatus::Failed, Some(error.to_string())).await;
        }
        Ok(updated)
    }

    pub async fn get(&self, reference_id: Uuid) -> Result<Option<ReferenceFeatureSet>> {
        references::load_reference(&self.db, reference_id).await
    }

    pub async fn find_active(&self, song_id: &str, voice_part: &str) -> Result<Option<ReferenceFeatureSet>> {
        references::find_active_reference(&self.db, song_id, voice_part).await
    }

    /// References currently in `status`
    pub async fn ids_with_status(&self, status: JobStatus) -> Result<Vec<Uuid>> {
        references::list_reference_ids_by_status(&self.db, status).await
    }

    /// Replace the live reference with a fresh PENDING row
    ///
    /// The current row is failed as superseded and a new row is created from
    /// its source track, isolation flag and sections.
    pub async fn force_reprocess(&self, song_id: &str, voice_part: &str) -> Result<GetOrCreate> {
        let current = self.find_active(song_id, voice_part).await?.ok_or_else(|| {
            Error::NotFound(format!("No active reference for {}/{}", song_id, voice_part))
        })?;

        info!(
            reference_id = %current.reference_id,
            song_id,
            voice_part,
            "Force reprocess requested"
        );
        self.mark_failed(current.reference_id, SUPERSEDED_MESSAGE).await?;

        self.get_or_create(
            song_id,
            voice_part,
            &current.source_track_ref,
            current.needs_isolation,
            current.sections.clone(),
        )
        .await
    }

    async fn emit_by_id(&self, reference_id: Uuid, status: JobStatus, error: Option<String>) {
        match self.get(reference_id).await {
            Ok(Some(reference)) => self.emit(&reference, status, error),
            Ok(None) => warn!(reference_id = %reference_id, "Reference vanished before event emit"),
            Err(e) => warn!(reference_id = %reference_id, "Failed to load reference for event: {}", e),
        }
    }

    fn emit(&self, reference: &ReferenceFeatureSet, status: JobStatus, error: Option<String>) {
        self.event_bus.emit_lossy(ChorusEvent::ReferenceStatusChanged {
            reference_id: reference.reference_id,
            song_id: reference.song_id.clone(),
            voice_part: reference.voice_part.clone(),
            status: status.to_string(),
            error,
            timestamp: chrono::Utc::now(),
        });
    }
}
