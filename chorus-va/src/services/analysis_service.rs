//! Library entry point for the analysis pipeline
//!
//! `AnalysisService` validates requests, writes the PENDING rows and hands
//! ids to the worker pool. Calls return as soon as the row exists.

use chorus_common::events::{ChorusEvent, EventBus};
use chorus_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AnalysisConfig;
use crate::db::attempts;
use crate::models::{AnalysisAttempt, AttemptStatus, JobStatus, ReferenceFeatureSet, Section};
use crate::services::artifact_store::ArtifactStore;
use crate::services::coaching::CoachingService;
use crate::services::job_queue::{Job, JobQueue, WorkerPool};
use crate::services::orchestrator::Orchestrator;
use crate::services::reference_store::{GetOrCreate, ReferenceStore};
use crate::services::source_isolator::SourceSeparator;
use crate::services::status_poller::{PollError, StatusPoller};

/// Message stored on rows a previous process left PROCESSING
pub const INTERRUPTED_MESSAGE: &str = "interrupted by service restart";

/// Upper bound for attempt listings
pub const MAX_LIST_LIMIT: u32 = 200;

/// Counts from startup recovery
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct RecoveryReport {
    pub references_failed: usize,
    pub attempts_failed: usize,
    pub references_requeued: usize,
    pub attempts_requeued: usize,
}

#[derive(Clone)]
pub struct AnalysisService {
    db: SqlitePool,
    event_bus: EventBus,
    references: ReferenceStore,
    queue: JobQueue,
    poller: StatusPoller,
}

impl AnalysisService {
    /// Build the pipeline and start its worker pool
    ///
    /// The returned pool must be shut down by the caller.
    pub fn start(
        db: SqlitePool,
        event_bus: EventBus,
        artifacts: Arc<dyn ArtifactStore>,
        separator: Arc<dyn SourceSeparator>,
        coaching: CoachingService,
        config: &AnalysisConfig,
    ) -> (AnalysisService, WorkerPool) {
        let orchestrator = Arc::new(Orchestrator::new(
            db.clone(),
            event_bus.clone(),
            artifacts,
            separator,
            coaching,
            config,
        ));
        let references = orchestrator.references().clone();
        let (queue, pool) = WorkerPool::start(config.jobs.worker_count, config.jobs.queue_capacity, orchestrator);

        let service = AnalysisService {
            poller: StatusPoller::new(db.clone()),
            db,
            event_bus,
            references,
            queue,
        };
        (service, pool)
    }

    /// Ensure a reference exists for (song, voice part) and is scheduled
    ///
    /// Idempotent: an existing non-FAILED row is returned unchanged.
    pub async fn prepare_reference(
        &self,
        song_id: &str,
        voice_part: &str,
        source_track_ref: &str,
        needs_isolation: bool,
        sections: Option<Vec<Section>>,
    ) -> Result<ReferenceFeatureSet> {
        require_non_empty("song_id", song_id)?;
        require_non_empty("voice_part", voice_part)?;
        require_non_empty("source_track_ref", source_track_ref)?;
        let sections = normalize_sections(sections)?;

        let outcome = self
            .references
            .get_or_create(song_id, voice_part, source_track_ref, needs_isolation, sections)
            .await?;
        self.schedule_if_created(&outcome).await?;
        Ok(outcome.into_reference())
    }

    /// Supersede the live reference and schedule a fresh preparation
    pub async fn force_reprocess(&self, song_id: &str, voice_part: &str) -> Result<ReferenceFeatureSet> {
        require_non_empty("song_id", song_id)?;
        require_non_empty("voice_part", voice_part)?;

        let outcome = self.references.force_reprocess(song_id, voice_part).await?;
        self.schedule_if_created(&outcome).await?;
        Ok(outcome.into_reference())
    }

    pub async fn get_reference(&self, reference_id: Uuid) -> Result<Option<ReferenceFeatureSet>> {
        self.references.get(reference_id).await
    }

    /// Queue a recording for analysis; returns the new attempt id
    pub async fn analyze(
        &self,
        user_id: &str,
        song_id: &str,
        voice_part: &str,
        recording_ref: &str,
        sections: Option<Vec<Section>>,
    ) -> Result<Uuid> {
        require_non_empty("user_id", user_id)?;
        require_non_empty("song_id", song_id)?;
        require_non_empty("voice_part", voice_part)?;
        require_non_empty("recording_ref", recording_ref)?;
        let sections = normalize_sections(sections)?;

        let attempt = AnalysisAttempt::new(user_id, song_id, voice_part, recording_ref, sections);
        attempts::insert_attempt(&self.db, &attempt).await?;
        self.queue.enqueue(Job::Analyze(attempt.attempt_id))?;

        info!(
            attempt_id = %attempt.attempt_id,
            user_id,
            song_id,
            voice_part,
            "Analysis queued"
        );
        Ok(attempt.attempt_id)
    }

    pub async fn get_status(&self, attempt_id: Uuid) -> Result<Option<AttemptStatus>> {
        Ok(attempts::load_attempt(&self.db, attempt_id)
            .await?
            .map(|attempt| attempt.to_status()))
    }

    /// Recent attempts of one singer, newest first
    pub async fn list_attempts(&self, user_id: &str, limit: u32) -> Result<Vec<AttemptStatus>> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let listed = attempts::list_attempts_for_user(&self.db, user_id, limit).await?;
        Ok(listed.iter().map(AnalysisAttempt::to_status).collect())
    }

    /// Poll until the attempt is READY or FAILED
    pub async fn wait_for_terminal(
        &self,
        attempt_id: Uuid,
        timeout: Duration,
        interval: Duration,
    ) -> std::result::Result<AttemptStatus, PollError> {
        self.poller.wait_for_terminal(attempt_id, timeout, interval).await
    }

    pub fn poller(&self) -> &StatusPoller {
        &self.poller
    }

    /// Settle rows left behind by a previous process
    ///
    /// PROCESSING rows cannot be resumed and become FAILED; PENDING rows are
    /// queued again.
    pub async fn recover_pending(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for reference_id in self.references.ids_with_status(JobStatus::Processing).await? {
            if self.references.mark_failed(reference_id, INTERRUPTED_MESSAGE).await? {
                report.references_failed += 1;
            }
        }

        for attempt_id in attempts::list_attempt_ids_by_status(&self.db, JobStatus::Processing).await? {
            let Some(attempt) = attempts::load_attempt(&self.db, attempt_id).await? else {
                continue;
            };
            if attempts::fail_attempt(&self.db, attempt_id, None, INTERRUPTED_MESSAGE, "PIPELINE_ERROR").await? {
                report.attempts_failed += 1;
                self.event_bus.emit_lossy(ChorusEvent::AnalysisFailed {
                    attempt_id,
                    user_id: attempt.user_id,
                    stage: "recovery".to_string(),
                    error: INTERRUPTED_MESSAGE.to_string(),
                    timestamp: chrono::Utc::now(),
                });
            }
        }

        for reference_id in self.references.ids_with_status(JobStatus::Pending).await? {
            self.queue.enqueue(Job::PrepareReference(reference_id))?;
            report.references_requeued += 1;
        }

        for attempt_id in attempts::list_attempt_ids_by_status(&self.db, JobStatus::Pending).await? {
            self.queue.enqueue(Job::Analyze(attempt_id))?;
            report.attempts_requeued += 1;
        }

        if report == RecoveryReport::default() {
            info!("Startup recovery: nothing to recover");
        } else {
            warn!(
                references_failed = report.references_failed,
                attempts_failed = report.attempts_failed,
                references_requeued = report.references_requeued,
                attempts_requeued = report.attempts_requeued,
                "Startup recovery settled unfinished work"
            );
        }
        Ok(report)
    }

    async fn schedule_if_created(&self, outcome: &GetOrCreate) -> Result<()> {
        if let GetOrCreate::Created(reference) = outcome {
            self.queue.enqueue(Job::PrepareReference(reference.reference_id))?;
        }
        Ok(())
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Empty section lists mean "use the default partition"
fn normalize_sections(sections: Option<Vec<Section>>) -> Result<Option<Vec<Section>>> {
    match sections {
        Some(list) if list.is_empty() => Ok(None),
        Some(list) => {
            Section::validate_list(&list).map_err(Error::InvalidInput)?;
            Ok(Some(list))
        }
        None => Ok(None),
    }
}
