//! Job Orchestrator
//!
//! Runs reference preparation (isolate → decode → extract → store) and
//! attempt analysis (reference → decode → extract → align → score → coach)
//! and owns every status transition of an attempt.
//!
//! CPU-bound stages run on the blocking pool. An attempt's results are
//! written in the same UPDATE that marks it READY; a failure records
//! "<stage>: <message>" plus the error kind. Either way an event is emitted.

use async_trait::async_trait;
use chorus_common::events::{ChorusEvent, EventBus};
use sqlx::SqlitePool;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{AnalysisConfig, JobsConfig};
use crate::db::attempts;
use crate::error::AnalysisError;
use crate::models::{
    AnalysisAttempt, FeatureSequence, JobStatus, PreparedReference, ReferenceFeatureSet,
    ScoreBreakdown, Section,
};
use crate::services::alignment::AlignmentEngine;
use crate::services::artifact_store::ArtifactStore;
use crate::services::coaching::CoachingService;
use crate::services::feature_extractor::FeatureExtractor;
use crate::services::job_queue::{Job, JobHandler};
use crate::services::reference_store::ReferenceStore;
use crate::services::scoring::ScoringEngine;
use crate::services::source_isolator::{SourceIsolator, SourceSeparator};
use crate::utils::{decode_audio_file, DecodedAudio};

/// Pipeline stage names recorded on failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Reference,
    Isolate,
    Decode,
    Extract,
    Store,
    Align,
    Score,
    Coach,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Reference => "reference",
            Stage::Isolate => "isolate",
            Stage::Decode => "decode",
            Stage::Extract => "extract",
            Stage::Store => "store",
            Stage::Align => "align",
            Stage::Score => "score",
            Stage::Coach => "coach",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A component error tagged with the stage it happened in
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{stage}: {error}")]
pub struct StageError {
    pub stage: Stage,
    pub error: AnalysisError,
}

impl StageError {
    pub fn new(stage: Stage, error: AnalysisError) -> Self {
        Self { stage, error }
    }
}

fn at(stage: Stage) -> impl Fn(AnalysisError) -> StageError {
    move |error| StageError::new(stage, error)
}

/// Why an attempt run stopped without a result
enum RunError {
    Failed(StageError),
    /// Shutdown while waiting; the attempt stays PROCESSING for recovery
    Cancelled,
}

impl From<StageError> for RunError {
    fn from(err: StageError) -> Self {
        RunError::Failed(err)
    }
}

struct ScoredAttempt {
    reference_id: Uuid,
    breakdown: ScoreBreakdown,
    tips: Vec<String>,
}

/// Sequences the pipeline components for references and attempts
pub struct Orchestrator {
    db: SqlitePool,
    event_bus: EventBus,
    references: ReferenceStore,
    artifacts: Arc<dyn ArtifactStore>,
    isolator: SourceIsolator,
    extractor: Arc<FeatureExtractor>,
    aligner: Arc<AlignmentEngine>,
    scorer: Arc<ScoringEngine>,
    coaching: CoachingService,
    jobs: JobsConfig,
}

impl Orchestrator {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        artifacts: Arc<dyn ArtifactStore>,
        separator: Arc<dyn SourceSeparator>,
        coaching: CoachingService,
        config: &AnalysisConfig,
    ) -> Self {
        Self {
            references: ReferenceStore::new(db.clone(), event_bus.clone()),
            isolator: SourceIsolator::new(separator, Arc::clone(&artifacts), config.isolation.clone()),
            extractor: Arc::new(FeatureExtractor::new(config.extraction.clone())),
            aligner: Arc::new(AlignmentEngine::new(config.alignment.clone())),
            scorer: Arc::new(ScoringEngine::new(config.scoring.clone(), &config.alignment)),
            jobs: config.jobs.clone(),
            db,
            event_bus,
            artifacts,
            coaching,
        }
    }

    pub fn references(&self) -> &ReferenceStore {
        &self.references
    }

    /// Claim and prepare a PENDING reference
    ///
    /// Returns without doing anything when another worker holds the claim.
    pub async fn prepare_reference(&self, reference_id: Uuid) {
        let reference = match self.references.get(reference_id).await {
            Ok(Some(reference)) => reference,
            Ok(None) => {
                warn!(%reference_id, "Reference not found, skipping preparation");
                return;
            }
            Err(e) => {
                error!(%reference_id, "Failed to load reference: {}", e);
                return;
            }
        };

        match self.references.mark_processing(reference_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(%reference_id, status = %reference.status, "Reference already claimed");
                return;
            }
            Err(e) => {
                error!(%reference_id, "Failed to claim reference: {}", e);
                return;
            }
        }

        info!(
            %reference_id,
            song_id = %reference.song_id,
            voice_part = %reference.voice_part,
            "Preparing reference"
        );
        let started = Instant::now();

        let outcome = match self.build_reference(&reference).await {
            Ok(prepared) => self.references.mark_ready(reference_id, &prepared).await,
            Err(stage_error) => {
                warn!(
                    %reference_id,
                    stage = %stage_error.stage,
                    kind = stage_error.error.kind(),
                    "Reference preparation failed: {}",
                    stage_error.error
                );
                self.references
                    .mark_failed(reference_id, &stage_error.to_string())
                    .await
            }
        };

        match outcome {
            Ok(_) => debug!(
                %reference_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Reference preparation finished"
            ),
            Err(e) => error!(%reference_id, "Failed to record reference outcome: {}", e),
        }
    }

    async fn build_reference(&self, reference: &ReferenceFeatureSet) -> Result<PreparedReference, StageError> {
        let reference_id = reference.reference_id;

        let source = self
            .artifacts
            .resolve(&reference.source_track_ref)
            .map_err(at(Stage::Isolate))?;
        let isolation = self
            .isolator
            .isolate(reference_id, &source, reference.needs_isolation)
            .await
            .map_err(at(Stage::Isolate))?;

        let decoded = decode_blocking(isolation.audio_path.clone()).await?;
        let source_duration_ms = decoded.duration_ms();
        let features = self.extract_blocking(decoded).await?;

        let features_ref = self
            .artifacts
            .write_features(reference_id, &features)
            .await
            .map_err(at(Stage::Store))?;

        debug!(
            %reference_id,
            frames = features.len(),
            voiced_ratio = features.voiced_ratio(),
            "Reference features stored"
        );

        Ok(PreparedReference {
            features_ref,
            isolated_audio_ref: isolation.isolated_ref,
            isolation_model_id: isolation.model_id,
            isolation_degraded: isolation.degraded,
            source_duration_ms,
        })
    }

    /// Claim and analyse one attempt, recording READY or FAILED
    pub async fn run_attempt(&self, attempt_id: Uuid, cancel: &CancellationToken) {
        let attempt = match attempts::load_attempt(&self.db, attempt_id).await {
            Ok(Some(attempt)) => attempt,
            Ok(None) => {
                warn!(%attempt_id, "Attempt not found, skipping");
                return;
            }
            Err(e) => {
                error!(%attempt_id, "Failed to load attempt: {}", e);
                return;
            }
        };

        match attempts::claim_attempt(&self.db, attempt_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(%attempt_id, status = %attempt.status, "Attempt already claimed");
                return;
            }
            Err(e) => {
                error!(%attempt_id, "Failed to claim attempt: {}", e);
                return;
            }
        }

        info!(
            %attempt_id,
            user_id = %attempt.user_id,
            song_id = %attempt.song_id,
            voice_part = %attempt.voice_part,
            "Analysis started"
        );
        self.event_bus.emit_lossy(ChorusEvent::AnalysisStarted {
            attempt_id,
            user_id: attempt.user_id.clone(),
            timestamp: chrono::Utc::now(),
        });

        let started = Instant::now();
        let mut reference_used = None;
        match self.analyze(&attempt, &mut reference_used, cancel).await {
            Ok(scored) => self.record_success(&attempt, scored, started).await,
            Err(RunError::Failed(stage_error)) => {
                self.record_failure(&attempt, reference_used, stage_error).await
            }
            Err(RunError::Cancelled) => {
                info!(%attempt_id, "Analysis interrupted by shutdown");
            }
        }
    }

    async fn analyze(
        &self,
        attempt: &AnalysisAttempt,
        reference_used: &mut Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<ScoredAttempt, RunError> {
        let attempt_id = attempt.attempt_id;

        let reference = self.ready_reference(attempt, cancel).await?;
        *reference_used = Some(reference.reference_id);
        let features_ref = reference.features_ref.as_deref().ok_or_else(|| {
            StageError::new(
                Stage::Reference,
                AnalysisError::Pipeline("READY reference has no features".to_string()),
            )
        })?;
        let reference_features = self
            .artifacts
            .read_features(features_ref)
            .await
            .map_err(at(Stage::Reference))?;

        let recording = self
            .artifacts
            .resolve(&attempt.recording_ref)
            .map_err(at(Stage::Decode))?;
        let decoded = decode_blocking(recording).await?;
        debug!(%attempt_id, duration_ms = decoded.duration_ms(), "Recording decoded");

        let candidate_features = self.extract_blocking(decoded).await?;
        debug!(
            %attempt_id,
            frames = candidate_features.len(),
            voiced_ratio = candidate_features.voiced_ratio(),
            "Recording features extracted"
        );

        let aligner = Arc::clone(&self.aligner);
        let performance = run_blocking(Stage::Align, move || {
            aligner.align(&reference_features, &candidate_features)
        })
        .await?;

        let sections: Vec<Section> = attempt
            .sections_override
            .clone()
            .or_else(|| reference.sections.clone())
            .unwrap_or_default();
        let scorer = Arc::clone(&self.scorer);
        let breakdown = run_blocking(Stage::Score, move || scorer.score(&performance, &sections)).await?;

        let coach_started = Instant::now();
        let tips = self.coaching.tips(&breakdown).await;
        debug!(
            %attempt_id,
            stage = %Stage::Coach,
            tips = tips.len(),
            elapsed_ms = coach_started.elapsed().as_millis() as u64,
            "Coaching tips generated"
        );

        Ok(ScoredAttempt {
            reference_id: reference.reference_id,
            breakdown,
            tips,
        })
    }

    /// The READY reference for the attempt's song and voice part
    ///
    /// A PENDING reference is prepared inline; one being prepared elsewhere
    /// is polled until it settles or the wait times out.
    async fn ready_reference(
        &self,
        attempt: &AnalysisAttempt,
        cancel: &CancellationToken,
    ) -> Result<ReferenceFeatureSet, RunError> {
        let reference_error = |message: String| StageError::new(Stage::Reference, AnalysisError::Pipeline(message));

        let reference = self
            .references
            .find_active(&attempt.song_id, &attempt.voice_part)
            .await
            .map_err(|e| reference_error(e.to_string()))?
            .ok_or_else(|| {
                reference_error(format!(
                    "No reference prepared for {}/{}",
                    attempt.song_id, attempt.voice_part
                ))
            })?;
        let reference_id = reference.reference_id;

        if reference.status == JobStatus::Ready {
            return Ok(reference);
        }
        if reference.status == JobStatus::Pending {
            debug!(attempt_id = %attempt.attempt_id, %reference_id, "Preparing reference inline");
            self.prepare_reference(reference_id).await;
        }

        let timeout = Duration::from_secs(self.jobs.reference_wait_timeout_secs);
        let interval = Duration::from_millis(self.jobs.reference_poll_interval_ms.max(1));
        let deadline = Instant::now() + timeout;

        loop {
            let current = self
                .references
                .get(reference_id)
                .await
                .map_err(|e| reference_error(e.to_string()))?
                .ok_or_else(|| reference_error(format!("Reference {} disappeared", reference_id)))?;

            match current.status {
                JobStatus::Ready => return Ok(current),
                JobStatus::Failed => {
                    return Err(reference_error(format!(
                        "Reference preparation failed: {}",
                        current.error_message.as_deref().unwrap_or("unknown error")
                    ))
                    .into());
                }
                JobStatus::Pending | JobStatus::Processing => {}
            }

            if Instant::now() >= deadline {
                return Err(reference_error(format!(
                    "Timed out after {}s waiting for reference {}",
                    timeout.as_secs(),
                    reference_id
                ))
                .into());
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(RunError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn extract_blocking(&self, decoded: DecodedAudio) -> Result<FeatureSequence, StageError> {
        let extractor = Arc::clone(&self.extractor);
        run_blocking(Stage::Extract, move || {
            extractor.extract(&decoded.samples, decoded.sample_rate)
        })
        .await
    }

    async fn record_success(&self, attempt: &AnalysisAttempt, scored: ScoredAttempt, started: Instant) {
        let attempt_id = attempt.attempt_id;
        match attempts::complete_attempt(
            &self.db,
            attempt_id,
            scored.reference_id,
            &scored.breakdown,
            &scored.tips,
        )
        .await
        {
            Ok(true) => {
                info!(
                    %attempt_id,
                    reference_id = %scored.reference_id,
                    overall = scored.breakdown.overall,
                    pitch = scored.breakdown.pitch,
                    timing = scored.breakdown.timing,
                    dynamics = scored.breakdown.dynamics,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Analysis READY"
                );
                self.event_bus.emit_lossy(ChorusEvent::AnalysisCompleted {
                    attempt_id,
                    user_id: attempt.user_id.clone(),
                    overall_score: scored.breakdown.overall,
                    timestamp: chrono::Utc::now(),
                });
            }
            Ok(false) => warn!(%attempt_id, "Attempt no longer PROCESSING, result discarded"),
            Err(e) => {
                error!(%attempt_id, "Failed to store analysis result: {}", e);
                let stage_error = StageError::new(Stage::Score, AnalysisError::from(e));
                self.record_failure(attempt, Some(scored.reference_id), stage_error).await;
            }
        }
    }

    async fn record_failure(&self, attempt: &AnalysisAttempt, reference_id: Option<Uuid>, failure: StageError) {
        let attempt_id = attempt.attempt_id;
        let message = failure.to_string();

        if failure.error.is_user_facing() {
            info!(%attempt_id, stage = %failure.stage, kind = failure.error.kind(), "Analysis FAILED: {}", failure.error);
        } else {
            warn!(%attempt_id, stage = %failure.stage, kind = failure.error.kind(), "Analysis FAILED: {}", failure.error);
        }

        match attempts::fail_attempt(&self.db, attempt_id, reference_id, &message, failure.error.kind()).await {
            Ok(_) => {}
            Err(e) => error!(%attempt_id, "Failed to record analysis failure: {}", e),
        }

        self.event_bus.emit_lossy(ChorusEvent::AnalysisFailed {
            attempt_id,
            user_id: attempt.user_id.clone(),
            stage: failure.stage.to_string(),
            error: failure.error.to_string(),
            timestamp: chrono::Utc::now(),
        });
    }
}

#[async_trait]
impl JobHandler for Orchestrator {
    async fn handle(&self, job: Job, cancel: &CancellationToken) {
        match job {
            Job::PrepareReference(reference_id) => self.prepare_reference(reference_id).await,
            Job::Analyze(attempt_id) => self.run_attempt(attempt_id, cancel).await,
        }
    }
}

async fn decode_blocking(path: PathBuf) -> Result<DecodedAudio, StageError> {
    run_blocking(Stage::Decode, move || decode_audio_file(&path)).await
}

/// Run CPU-bound work on the blocking pool, tagging errors with `stage`
async fn run_blocking<T, F>(stage: Stage, work: F) -> Result<T, StageError>
where
    F: FnOnce() -> Result<T, AnalysisError> + Send + 'static,
    T: Send + 'static,
{
    let started = Instant::now();
    let result = match tokio::task::spawn_blocking(work).await {
        Ok(result) => result.map_err(at(stage)),
        Err(join_error) => Err(StageError::new(
            stage,
            AnalysisError::Pipeline(format!("Worker task failed: {}", join_error)),
        )),
    };
    debug!(
        stage = %stage,
        ok = result.is_ok(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Stage finished"
    );
    result
}
