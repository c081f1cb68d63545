//! Per-run status tracker
//!
//! Statuses: CLAIMED → WORKING → {COMPLETED | FAILED}

use chrono::{DateTime, Utc};
use loom_protocol::{JobStatus, ProjectId};
use serde::{Deserialize, Serialize};

use super::{next_seq, now_utc};

/// One confirmed status change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: JobStatus,
    pub to: JobStatus,
    pub at: DateTime<Utc>,
    pub seq: u64,
}

/// Status of a job as seen by one `run_job` invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusData {
    /// Run identifier (one per `run_job` call)
    pub run_id: String,

    /// Job identifier
    pub job_id: ProjectId,

    /// Last status confirmed by the coordinator
    pub status: JobStatus,

    /// When tracking started
    pub created_at: DateTime<Utc>,

    /// When the status was last updated
    pub updated_at: DateTime<Utc>,

    /// Monotonic sequence counter for ordering
    pub seq: u64,

    /// Confirmed transitions, oldest first
    pub history: Vec<StatusTransition>,
}

/// Errors for status operations
#[derive(Debug, thiserror::Error)]
pub enum JobStateError {
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Job is in terminal status {0}")]
    TerminalState(JobStatus),
}

impl JobStatusData {
    /// Start tracking a freshly claimed job
    pub fn claimed(run_id: String, job_id: ProjectId) -> Self {
        let now = now_utc();
        Self {
            run_id,
            job_id,
            status: JobStatus::Claimed,
            created_at: now,
            updated_at: now,
            seq: next_seq(),
            history: Vec::new(),
        }
    }

    /// Check a transition without applying it.
    ///
    /// Called before the coordinator is asked, so an out-of-order status is
    /// never put on the wire.
    pub fn check(&self, target: JobStatus) -> Result<(), JobStateError> {
        if self.status.is_terminal() {
            return Err(JobStateError::TerminalState(self.status));
        }
        if !self.status.can_transition_to(target) {
            return Err(JobStateError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }
        Ok(())
    }

    /// Record a confirmed transition
    pub fn transition(&mut self, target: JobStatus) -> Result<(), JobStateError> {
        self.check(target)?;

        let now = now_utc();
        let seq = next_seq();
        self.history.push(StatusTransition {
            from: self.status,
            to: target,
            at: now,
            seq,
        });
        self.status = target;
        self.updated_at = now;
        self.seq = seq;

        Ok(())
    }

    /// CLAIMED → WORKING
    pub fn start(&mut self) -> Result<(), JobStateError> {
        self.transition(JobStatus::Working)
    }

    /// WORKING → COMPLETED
    pub fn complete(&mut self) -> Result<(), JobStateError> {
        self.transition(JobStatus::Completed)
    }

    /// WORKING → FAILED
    pub fn fail(&mut self) -> Result<(), JobStateError> {
        self.transition(JobStatus::Failed)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> JobStatusData {
        JobStatusData::claimed("run-123".to_string(), ProjectId::new("42"))
    }

    #[test]
    fn test_new_tracker_is_claimed() {
        let state = tracker();
        assert_eq!(state.run_id, "run-123");
        assert_eq!(state.job_id.as_str(), "42");
        assert_eq!(state.status, JobStatus::Claimed);
        assert!(state.history.is_empty());
    }

    #[test]
    fn test_happy_path() {
        let mut state = tracker();

        // CLAIMED → WORKING
        assert!(state.start().is_ok());
        assert_eq!(state.status, JobStatus::Working);

        // WORKING → COMPLETED
        assert!(state.complete().is_ok());
        assert_eq!(state.status, JobStatus::Completed);
        assert!(state.is_terminal());
        assert_eq!(state.history.len(), 2);
        assert!(state.history[1].seq > state.history[0].seq);
    }

    #[test]
    fn test_fail_after_working() {
        let mut state = tracker();
        state.start().unwrap();
        assert!(state.fail().is_ok());
        assert_eq!(state.status, JobStatus::Failed);
    }

    #[test]
    fn test_cannot_fail_before_working() {
        let state = tracker();
        let result = state.check(JobStatus::Failed);
        assert!(matches!(
            result,
            Err(JobStateError::InvalidTransition {
                from: JobStatus::Claimed,
                to: JobStatus::Failed
            })
        ));
    }

    #[test]
    fn test_cannot_complete_before_working() {
        let mut state = tracker();
        assert!(state.complete().is_err());
        assert_eq!(state.status, JobStatus::Claimed);
        assert!(state.history.is_empty());
    }

    #[test]
    fn test_terminal_state_no_transition() {
        let mut state = tracker();
        state.start().unwrap();
        state.complete().unwrap();

        let result = state.transition(JobStatus::Failed);
        assert!(matches!(result, Err(JobStateError::TerminalState(JobStatus::Completed))));
    }

    #[test]
    fn test_working_is_reported_once() {
        let mut state = tracker();
        state.start().unwrap();
        assert!(state.start().is_err());
    }

    #[test]
    fn test_serialization() {
        let mut state = tracker();
        state.start().unwrap();
        let json = state.to_json().unwrap();

        assert!(json.contains("\"job_id\": \"42\""));
        assert!(json.contains("\"status\": \"WORKING\""));
        assert!(json.contains("\"from\": \"CLAIMED\""));
    }
}
