//! Status update types.
//!
//! `PUT {base}/projects/{id}` with a [`StatusUpdate`] body. The same call
//! doubles as the finalize notification when it carries `progress: 100`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::FINAL_PROGRESS;

/// Job status as understood by the coordinator.
///
/// CLAIMED → WORKING → {COMPLETED | FAILED}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Claimed by this worker; held locally, never pushed.
    Claimed,
    /// Worker is executing the job.
    Working,
    /// Job finished successfully.
    Completed,
    /// Job failed.
    Failed,
}

impl JobStatus {
    /// Wire spelling of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claimed => "CLAIMED",
            Self::Working => "WORKING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Check if transition from this status to target is valid
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        matches!(
            (self, target),
            (JobStatus::Claimed, JobStatus::Working)
                | (JobStatus::Working, JobStatus::Completed)
                | (JobStatus::Working, JobStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a status update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: JobStatus,
    /// Completion percentage, only sent by the finalize call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

impl StatusUpdate {
    /// Plain status push.
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            progress: None,
        }
    }

    /// Terminal confirmation sent after a successful run.
    pub fn finalize() -> Self {
        Self {
            status: JobStatus::Completed,
            progress: Some(FINAL_PROGRESS),
        }
    }
}
