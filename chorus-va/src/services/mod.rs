//! Pipeline components and the services that sequence them

pub mod alignment;
pub mod analysis_service;
pub mod artifact_store;
pub mod coaching;
pub mod feature_extractor;
pub mod job_queue;
pub mod orchestrator;
pub mod pitch;
pub mod reference_store;
pub mod scoring;
pub mod source_isolator;
pub mod status_poller;

pub use alignment::{AlignedPerformance, Alignment, AlignmentEngine};
pub use analysis_service::{AnalysisService, RecoveryReport};
pub use artifact_store::{ArtifactStore, FilesystemArtifactStore};
pub use coaching::{CoachingService, HttpTipGenerator, TemplateTipGenerator, TipError, TipGenerator};
pub use feature_extractor::FeatureExtractor;
pub use job_queue::{Job, JobHandler, JobQueue, WorkerPool};
pub use orchestrator::{Orchestrator, Stage, StageError};
pub use reference_store::{GetOrCreate, ReferenceStore};
pub use scoring::ScoringEngine;
pub use source_isolator::{
    separator_from_config, CommandSeparator, NoopSeparator, SeparationError, SourceIsolator,
    SourceSeparator, UnavailableSeparator,
};
pub use status_poller::{PollError, StatusPoller};
