//! Mock coordinator implementation

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;

use loom_protocol::{JobStatus, ProjectPayload};

use super::failure::{CallKind, FailureConfig, FailureInjector};
use crate::coordinator::{Coordinator, CoordinatorError};
use crate::job::{JobDescriptor, JobId};

/// A call received by the mock, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorCall {
    Claim { slug: String },
    UpdateStatus { job_id: JobId, status: JobStatus },
    Finalize { job_id: JobId },
}

/// Minimal claimable project: an id and a script path, nothing else.
pub fn project_payload(id: &str, script_path: &str) -> ProjectPayload {
    ProjectPayload {
        id: JobId::new(id),
        title: None,
        kind: None,
        price: None,
        cloud_link: None,
        script_path: Some(script_path.to_string()),
    }
}

/// Configurable coordinator for tests
///
/// Slugs are single-use like the real coordinator's: a successful claim
/// removes the slug, so claiming it again yields `ClaimNotFound`.
#[derive(Debug, Default)]
pub struct MockCoordinator {
    /// Claimable projects by slug
    jobs: Mutex<HashMap<String, ProjectPayload>>,
    /// Every call received, including failed ones
    calls: Mutex<Vec<CoordinatorCall>>,
    /// Last status accepted per job
    statuses: Mutex<HashMap<JobId, JobStatus>>,
    failures: Mutex<FailureInjector>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`add_job`](Self::add_job).
    pub fn with_job(self, slug: impl Into<String>, project: ProjectPayload) -> Self {
        self.add_job(slug, project);
        self
    }

    /// Make `project` claimable under `slug`.
    pub fn add_job(&self, slug: impl Into<String>, project: ProjectPayload) {
        lock(&self.jobs).insert(slug.into(), project);
    }

    /// Inject a failure for a call kind
    pub fn inject(&self, kind: CallKind, config: FailureConfig) {
        lock(&self.failures).inject(kind, config);
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// All calls received so far
    pub fn calls(&self) -> Vec<CoordinatorCall> {
        lock(&self.calls).clone()
    }

    /// Statuses pushed for `job_id`, in order, including rejected attempts
    pub fn status_pushes(&self, job_id: &JobId) -> Vec<JobStatus> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                CoordinatorCall::UpdateStatus { job_id: id, status } if id == job_id => {
                    Some(*status)
                }
                _ => None,
            })
            .collect()
    }

    /// Number of finalize attempts for `job_id`
    pub fn finalize_count(&self, job_id: &JobId) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| matches!(call, CoordinatorCall::Finalize { job_id: id } if id == job_id))
            .count()
    }

    /// Last status the mock accepted for `job_id`
    pub fn remote_status(&self, job_id: &JobId) -> Option<JobStatus> {
        lock(&self.statuses).get(job_id).copied()
    }

    fn record(&self, call: CoordinatorCall) {
        lock(&self.calls).push(call);
    }

    /// Apply any injected delay and return the injected error, if one fires.
    fn check_failure(&self, kind: CallKind) -> Result<(), CoordinatorError> {
        let config = lock(&self.failures).check(kind).cloned();
        let Some(config) = config else {
            return Ok(());
        };
        if let Some(delay) = config.delay {
            thread::sleep(delay);
        }
        match config.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Coordinator for MockCoordinator {
    fn claim_job(&self, slug: &str) -> Result<JobDescriptor, CoordinatorError> {
        self.record(CoordinatorCall::Claim {
            slug: slug.to_string(),
        });
        self.check_failure(CallKind::Claim)?;

        let project = lock(&self.jobs)
            .remove(slug)
            .ok_or_else(|| CoordinatorError::ClaimNotFound {
                slug: slug.to_string(),
            })?;

        JobDescriptor::try_from(project)
            .map_err(|e| CoordinatorError::Protocol(format!("unusable claim response: {}", e)))
    }

    fn update_status(&self, job_id: &JobId, status: JobStatus) -> Result<(), CoordinatorError> {
        self.record(CoordinatorCall::UpdateStatus {
            job_id: job_id.clone(),
            status,
        });
        self.check_failure(CallKind::UpdateStatus(status))?;

        lock(&self.statuses).insert(job_id.clone(), status);
        Ok(())
    }

    fn finalize_job(&self, job_id: &JobId) -> Result<(), CoordinatorError> {
        self.record(CoordinatorCall::Finalize {
            job_id: job_id.clone(),
        });
        self.check_failure(CallKind::Finalize)?;

        lock(&self.statuses).insert(job_id.clone(), JobStatus::Completed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_single_use() {
        let mock = MockCoordinator::new().with_job("s1", project_payload("4", "/run.py"));

        let job = mock.claim_job("s1").unwrap();
        assert_eq!(job.id().as_str(), "4");

        let err = mock.claim_job("s1").unwrap_err();
        assert!(err.is_claim_not_found());
        assert_eq!(mock.calls().len(), 2);
    }

    #[test]
    fn test_status_pushes_recorded() {
        let mock = MockCoordinator::new();
        let id = JobId::new("4");

        mock.update_status(&id, JobStatus::Working).unwrap();
        mock.update_status(&id, JobStatus::Completed).unwrap();
        mock.finalize_job(&id).unwrap();

        assert_eq!(
            mock.status_pushes(&id),
            vec![JobStatus::Working, JobStatus::Completed]
        );
        assert_eq!(mock.finalize_count(&id), 1);
        assert_eq!(mock.remote_status(&id), Some(JobStatus::Completed));
    }

    #[test]
    fn test_injected_failure_still_recorded() {
        let mock = MockCoordinator::new();
        let id = JobId::new("4");
        mock.inject(
            CallKind::UpdateStatus(JobStatus::Working),
            FailureConfig::unreachable("offline").with_fail_count(1),
        );

        assert!(mock.update_status(&id, JobStatus::Working).is_err());
        assert_eq!(mock.remote_status(&id), None);

        mock.update_status(&id, JobStatus::Working).unwrap();
        assert_eq!(mock.status_pushes(&id).len(), 2);
        assert_eq!(mock.remote_status(&id), Some(JobStatus::Working));
    }

    #[test]
    fn test_unusable_project_is_protocol_error() {
        let mut project = project_payload("4", "/run.py");
        project.script_path = None;
        let mock = MockCoordinator::new().with_job("s", project);

        let err = mock.claim_job("s").unwrap_err();
        assert!(matches!(err, CoordinatorError::Protocol(_)));
    }
}
