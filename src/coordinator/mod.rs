//! Coordinator client
//!
//! The worker talks to the coordinator through the [`Coordinator`] trait so
//! the pipeline can be driven by the HTTP client in production and by
//! [`MockCoordinator`](crate::mock::MockCoordinator) in tests.

mod http;

pub use http::HttpCoordinator;

use crate::job::{JobDescriptor, JobId};
use loom_protocol::JobStatus;

/// Coordinator errors
///
/// Payloads are plain strings so errors can be cloned into the mock's
/// failure table and across the job thread's result channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Invalid or expired slug: {slug:?}")]
    ClaimNotFound { slug: String },

    #[error("Coordinator unreachable: {0}")]
    Unreachable(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl CoordinatorError {
    pub fn is_claim_not_found(&self) -> bool {
        matches!(self, CoordinatorError::ClaimNotFound { .. })
    }
}

/// Operations the worker performs against the coordinator.
pub trait Coordinator: Send + Sync {
    /// Exchange a one-time slug for a job.
    fn claim_job(&self, slug: &str) -> Result<JobDescriptor, CoordinatorError>;

    /// Push a status for a claimed job.
    fn update_status(&self, job_id: &JobId, status: JobStatus) -> Result<(), CoordinatorError>;

    /// Tell the coordinator the job is fully done (COMPLETED at 100%).
    fn finalize_job(&self, job_id: &JobId) -> Result<(), CoordinatorError>;
}
