//! Service harness: temp root folder, database, artifact store and workers

use async_trait::async_trait;
use chorus_common::events::EventBus;
use chorus_va::config::AnalysisConfig;
use chorus_va::db::init_database_pool;
use chorus_va::models::{AttemptStatus, ReferenceFeatureSet};
use chorus_va::services::{
    AnalysisService, CoachingService, FilesystemArtifactStore, NoopSeparator, SeparationError,
    SourceSeparator, WorkerPool,
};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use super::audio_generator::{write_wav, Note};

pub const SAMPLE_RATE: u32 = 16_000;

/// Defaults with short polling intervals for tests
pub fn test_config() -> AnalysisConfig {
    let mut config = AnalysisConfig::default();
    config.jobs.worker_count = 4;
    config.jobs.reference_poll_interval_ms = 20;
    config.jobs.reference_wait_timeout_secs = 30;
    config.isolation.enabled = true;
    config
}

/// Separator that waits before returning the input as the stem
pub struct SlowSeparator {
    pub delay: Duration,
}

#[async_trait]
impl SourceSeparator for SlowSeparator {
    async fn separate(
        &self,
        input: &Path,
        _output_dir: &Path,
        _model_id: &str,
    ) -> Result<PathBuf, SeparationError> {
        tokio::time::sleep(self.delay).await;
        Ok(input.to_path_buf())
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

pub struct TestHarness {
    pub dir: TempDir,
    pub pool: SqlitePool,
    pub event_bus: EventBus,
    pub service: AnalysisService,
    workers: WorkerPool,
}

impl TestHarness {
    pub async fn start(config: AnalysisConfig, separator: Arc<dyn SourceSeparator>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database_pool(&dir.path().join("chorus.db")).await.unwrap();
        let artifacts = FilesystemArtifactStore::new(dir.path());
        artifacts.ensure_layout().await.unwrap();

        let event_bus = EventBus::new(256);
        let coaching = CoachingService::template_only(&config.coaching);
        let (service, workers) = AnalysisService::start(
            pool.clone(),
            event_bus.clone(),
            Arc::new(artifacts),
            separator,
            coaching,
            &config,
        );

        Self {
            dir,
            pool,
            event_bus,
            service,
            workers,
        }
    }

    pub async fn with_defaults() -> Self {
        Self::start(test_config(), Arc::new(NoopSeparator)).await
    }

    /// Write a WAV under `recordings/` and return its artifact reference
    pub fn write_audio(&self, name: &str, notes: &[Note]) -> String {
        let reference = format!("recordings/{}", name);
        write_wav(&self.dir.path().join(&reference), SAMPLE_RATE, notes);
        reference
    }

    /// Poll until the reference is READY or FAILED
    pub async fn wait_for_reference(&self, reference_id: Uuid) -> ReferenceFeatureSet {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        loop {
            let reference = self.service.get_reference(reference_id).await.unwrap().unwrap();
            if reference.status.is_terminal() {
                return reference;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "reference {} did not settle",
                reference_id
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub async fn wait_for_attempt(&self, attempt_id: Uuid) -> AttemptStatus {
        self.service
            .wait_for_terminal(attempt_id, Duration::from_secs(60), Duration::from_millis(20))
            .await
            .unwrap()
    }

    pub async fn shutdown(self) {
        self.workers.shutdown().await;
    }
}
