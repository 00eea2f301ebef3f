//! Vocal source isolation
//!
//! `SourceSeparator` is the swappable separation backend. The
//! `SourceIsolator` service applies the preparation policy around it:
//! bounded concurrency, persistence of the stem, and the degrade/fail
//! fallback when separation is unavailable or fails.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::{IsolationConfig, IsolationFallback};
use crate::error::AnalysisError;
use crate::services::artifact_store::{ArtifactStore, STEMS_DIR};

/// Model id recorded when no separation was needed
pub const NO_ISOLATION_MODEL: &str = "none";

/// Separation backend errors
#[derive(Debug, Error)]
pub enum SeparationError {
    /// No separation backend is configured or installed
    #[error("Separator unavailable: {0}")]
    Unavailable(String),

    /// Separator ran and reported failure
    #[error("Separator failed (exit code {code:?}): {stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },

    #[error("Separator timed out after {0} seconds")]
    Timeout(u64),

    /// Separator exited cleanly but produced no vocal stem
    #[error("Vocal stem not found: {0}")]
    StemNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stem separation backend
#[async_trait]
pub trait SourceSeparator: Send + Sync {
    /// Separate the vocal line of `input` into a file under `output_dir`
    ///
    /// Returns the path of the vocal stem.
    async fn separate(
        &self,
        input: &Path,
        output_dir: &Path,
        model_id: &str,
    ) -> Result<PathBuf, SeparationError>;

    /// Name of this separator (for logging)
    fn name(&self) -> &'static str;
}

/// Pass-through separator for sources that already are a single vocal line
#[derive(Debug, Default, Clone)]
pub struct NoopSeparator;

#[async_trait]
impl SourceSeparator for NoopSeparator {
    async fn separate(
        &self,
        input: &Path,
        _output_dir: &Path,
        _model_id: &str,
    ) -> Result<PathBuf, SeparationError> {
        Ok(input.to_path_buf())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Separator used when isolation is enabled but no command is configured
#[derive(Debug, Default, Clone)]
pub struct UnavailableSeparator;

#[async_trait]
impl SourceSeparator for UnavailableSeparator {
    async fn separate(
        &self,
        _input: &Path,
        _output_dir: &Path,
        _model_id: &str,
    ) -> Result<PathBuf, SeparationError> {
        Err(SeparationError::Unavailable(
            "no separation command configured".to_string(),
        ))
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}

/// Runs an external separation CLI (Demucs-style)
///
/// `{input}`, `{output_dir}` and `{model}` in the argument list are
/// substituted; the stem is the first file named `stem_file_name` found
/// anywhere below the output directory.
#[derive(Debug, Clone)]
pub struct CommandSeparator {
    command: String,
    args: Vec<String>,
    stem_file_name: String,
    timeout: Duration,
}

impl CommandSeparator {
    pub fn new(command: String, args: Vec<String>, stem_file_name: String, timeout: Duration) -> Self {
        Self {
            command,
            args,
            stem_file_name,
            timeout,
        }
    }

    fn expand_args(&self, input: &Path, output_dir: &Path, model_id: &str) -> Vec<String> {
        let input = input.to_string_lossy();
        let output_dir = output_dir.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input)
                    .replace("{output_dir}", &output_dir)
                    .replace("{model}", model_id)
            })
            .collect()
    }

    fn find_stem(&self, output_dir: &Path) -> Option<PathBuf> {
        WalkDir::new(output_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .find(|entry| {
                entry.file_type().is_file() && entry.file_name().to_string_lossy() == self.stem_file_name.as_str()
            })
            .map(|entry| entry.into_path())
    }
}

#[async_trait]
impl SourceSeparator for CommandSeparator {
    async fn separate(
        &self,
        input: &Path,
        output_dir: &Path,
        model_id: &str,
    ) -> Result<PathBuf, SeparationError> {
        let args = self.expand_args(input, output_dir, model_id);
        debug!(command = %self.command, ?args, "Running separator");

        let mut command = tokio::process::Command::new(&self.command);
        command.args(&args).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SeparationError::Unavailable(format!(
                    "command not found: {}",
                    self.command
                )));
            }
            Ok(Err(e)) => return Err(SeparationError::Io(e)),
            Err(_) => return Err(SeparationError::Timeout(self.timeout.as_secs())),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SeparationError::CommandFailed {
                code: output.status.code(),
                stderr: stderr.chars().take(500).collect(),
            });
        }

        self.find_stem(output_dir)
            .ok_or_else(|| SeparationError::StemNotFound(self.stem_file_name.clone()))
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

/// Build the separator described by the configuration
pub fn separator_from_config(config: &IsolationConfig) -> Arc<dyn SourceSeparator> {
    match &config.command {
        Some(command) if config.enabled => Arc::new(CommandSeparator::new(
            command.clone(),
            config.args.clone(),
            config.stem_file_name.clone(),
            Duration::from_secs(config.timeout_secs),
        )),
        _ if config.enabled => Arc::new(UnavailableSeparator),
        _ => Arc::new(NoopSeparator),
    }
}

/// Result of isolating (or skipping isolation of) a reference source
#[derive(Debug, Clone, PartialEq)]
pub struct IsolationOutcome {
    /// Audio the extractor should read
    pub audio_path: PathBuf,
    /// Stored stem reference when isolation succeeded
    pub isolated_ref: Option<String>,
    pub model_id: String,
    /// Separation failed and the unseparated mix is used
    pub degraded: bool,
}

/// Applies the isolation policy around a separator
pub struct SourceIsolator {
    separator: Arc<dyn SourceSeparator>,
    artifacts: Arc<dyn ArtifactStore>,
    permits: Arc<Semaphore>,
    config: IsolationConfig,
}

impl SourceIsolator {
    pub fn new(
        separator: Arc<dyn SourceSeparator>,
        artifacts: Arc<dyn ArtifactStore>,
        config: IsolationConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            separator,
            artifacts,
            permits,
            config,
        }
    }

    /// Isolate the vocal line of a reference source
    ///
    /// Skipped (model "none") when the source needs no isolation or
    /// isolation is disabled.
    pub async fn isolate(
        &self,
        reference_id: Uuid,
        source: &Path,
        needs_isolation: bool,
    ) -> Result<IsolationOutcome, AnalysisError> {
        if !needs_isolation || !self.config.enabled {
            return Ok(IsolationOutcome {
                audio_path: source.to_path_buf(),
                isolated_ref: None,
                model_id: NO_ISOLATION_MODEL.to_string(),
                degraded: false,
            });
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| AnalysisError::Pipeline(format!("Isolation semaphore closed: {}", e)))?;

        let work_dir = self.artifacts.work_dir(STEMS_DIR, reference_id).await?;
        let started = std::time::Instant::now();
        let result = self
            .separator
            .separate(source, &work_dir, &self.config.model_id)
            .await;

        match result {
            Ok(stem_path) => {
                let stem_name = format!("{}/{}", reference_id, self.config.stem_file_name);
                let isolated_ref = self.artifacts.store_file(STEMS_DIR, &stem_name, &stem_path).await?;
                let audio_path = self.artifacts.resolve(&isolated_ref)?;
                remove_work_dir(&work_dir).await;

                info!(
                    %reference_id,
                    separator = self.separator.name(),
                    model_id = %self.config.model_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Vocal line isolated"
                );
                Ok(IsolationOutcome {
                    audio_path,
                    isolated_ref: Some(isolated_ref),
                    model_id: self.config.model_id.clone(),
                    degraded: false,
                })
            }
            Err(e) => {
                remove_work_dir(&work_dir).await;
                match self.config.fallback {
                    IsolationFallback::Degrade => {
                        warn!(
                            %reference_id,
                            separator = self.separator.name(),
                            error = %e,
                            "Isolation failed, using unseparated source"
                        );
                        Ok(IsolationOutcome {
                            audio_path: source.to_path_buf(),
                            isolated_ref: None,
                            model_id: self.config.model_id.clone(),
                            degraded: true,
                        })
                    }
                    IsolationFallback::Fail => Err(AnalysisError::Separation(e.to_string())),
                }
            }
        }
    }
}

async fn remove_work_dir(path: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        debug!(path = %path.display(), error = %e, "Work directory cleanup failed");
    }
}
