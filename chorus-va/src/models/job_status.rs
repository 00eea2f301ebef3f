//! Job status state machine
//!
//! PENDING → PROCESSING → {READY, FAILED}. Terminal states are final.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a reference preparation or an analysis attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    /// Created, waiting for a worker
    Pending,
    /// Claimed by a worker
    Processing,
    /// Finished successfully
    Ready,
    /// Finished with an error
    Failed,
}

impl JobStatus {
    /// Database / wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Ready => "READY",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Ready | JobStatus::Failed)
    }

    /// Whether `self → next` is a legal transition
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Ready)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = chorus_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "READY" => Ok(JobStatus::Ready),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(chorus_common::Error::Internal(format!(
                "Unknown job status: {}",
                other
            ))),
        }
    }
}
