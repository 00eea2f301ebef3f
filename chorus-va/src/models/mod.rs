//! Data models for chorus-va (vocal analysis service)
//!
//! - Job status state machine shared by references and attempts
//! - Feature sequences produced by the extractor
//! - Score breakdowns and section boundaries
//! - Persisted reference feature sets and analysis attempts

pub mod attempt;
pub mod features;
pub mod job_status;
pub mod reference;
pub mod scores;

pub use attempt::{AnalysisAttempt, AttemptStatus, OverallScores};
pub use features::{FeatureFrame, FeatureSequence};
pub use job_status::JobStatus;
pub use reference::{PreparedReference, ReferenceFeatureSet};
pub use scores::{ScoreAxis, ScoreBreakdown, Section, SectionScore};
