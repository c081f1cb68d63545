//! Job pipeline
//!
//! Drives one claimed job through the coordinator's status machine:
//!
//! 1. Push WORKING. If that fails nothing else happens.
//! 2. Create the workspace, download script and dataset, run the script.
//! 3. Push COMPLETED, then finalize (best effort).
//!
//! Any failure after WORKING is confirmed triggers a single FAILED push
//! before the original error is returned. Progress is reported to the
//! [`LogSink`]; the result of a run is an [`ExecutionOutcome`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use loom_protocol::JobStatus;

use crate::config::WorkerConfig;
use crate::coordinator::{Coordinator, CoordinatorError};
use crate::fetch::{FetchError, Fetcher};
use crate::job::JobDescriptor;
use crate::log_sink::LogSink;
use crate::script::{ScriptError, ScriptRunner};
use crate::state::{JobStateError, JobStatusData};
use crate::workspace::{WorkspaceError, WorkspaceHandle};

/// Where in the pipeline a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Claim,
    StatusUpdate,
    Workspace,
    Download,
    Execute,
    Finalize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Claim => "claim",
            Stage::StatusUpdate => "status-update",
            Stage::Workspace => "workspace",
            Stage::Download => "download",
            Stage::Execute => "execute",
            Stage::Finalize => "finalize",
        }
    }

    /// Process exit code used by the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            Stage::Claim => 10,
            Stage::StatusUpdate => 20,
            Stage::Workspace => 30,
            Stage::Download => 40,
            Stage::Execute => 50,
            Stage::Finalize => 60,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job errors
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Claim(#[from] CoordinatorError),

    #[error("Unable to update status to {status}: {source}")]
    StatusUpdateFailed {
        status: JobStatus,
        #[source]
        source: CoordinatorError,
    },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Download(#[from] FetchError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    State(#[from] JobStateError),
}

impl JobError {
    pub fn stage(&self) -> Stage {
        match self {
            JobError::Claim(_) => Stage::Claim,
            JobError::StatusUpdateFailed { .. } | JobError::State(_) => Stage::StatusUpdate,
            JobError::Workspace(_) => Stage::Workspace,
            JobError::Download(_) => Stage::Download,
            JobError::Script(_) => Stage::Execute,
        }
    }
}

/// Terminal result of one `run_job` call
#[derive(Debug)]
pub enum ExecutionOutcome {
    Success,
    Failure { stage: Stage, error: JobError },
}

impl ExecutionOutcome {
    fn failure(error: JobError) -> Self {
        ExecutionOutcome::Failure {
            stage: error.stage(),
            error,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success)
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            ExecutionOutcome::Success => None,
            ExecutionOutcome::Failure { stage, .. } => Some(*stage),
        }
    }

    pub fn error(&self) -> Option<&JobError> {
        match self {
            ExecutionOutcome::Success => None,
            ExecutionOutcome::Failure { error, .. } => Some(error),
        }
    }

    /// One-line, human-readable summary including stage and cause
    pub fn message(&self) -> String {
        match self {
            ExecutionOutcome::Success => "Job completed successfully!".to_string(),
            ExecutionOutcome::Failure { stage, error } => {
                format!("[{}] {}", stage, error)
            }
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.stage().map_or(0, |stage| stage.exit_code())
    }
}

/// Everything a run produced
#[derive(Debug)]
pub struct JobRun {
    pub outcome: ExecutionOutcome,
    /// Statuses the coordinator confirmed during this run
    pub status: JobStatusData,
    /// Whether the finalize call was acknowledged
    pub finalized: bool,
}

/// Result of a pipeline operation running on its own thread
#[derive(Debug)]
pub struct JobHandle<T> {
    receiver: Receiver<T>,
    thread: JoinHandle<()>,
}

impl<T> JobHandle<T> {
    fn spawn<F>(work: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let thread = thread::spawn(move || {
            // The receiver may be gone if the caller stopped waiting
            let _ = sender.send(work());
        });
        Self { receiver, thread }
    }

    /// The result, if the operation has finished.
    ///
    /// Returns `None` both while running and once the result has been taken.
    pub fn try_result(&self) -> Option<T> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the result.
    pub fn result_timeout(&self, timeout: Duration) -> Option<T> {
        self.receiver.recv_timeout(timeout).ok()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block until the operation finishes.
    ///
    /// `None` means the worker thread died without producing a result.
    pub fn wait(self) -> Option<T> {
        let result = self.receiver.recv().ok();
        let _ = self.thread.join();
        result
    }
}

/// Claims and runs jobs against one coordinator
#[derive(Clone)]
pub struct JobPipeline {
    coordinator: Arc<dyn Coordinator>,
    fetcher: Fetcher,
    runner: ScriptRunner,
    config: WorkerConfig,
    sink: LogSink,
}

impl fmt::Debug for JobPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl JobPipeline {
    pub fn new(
        config: WorkerConfig,
        coordinator: Arc<dyn Coordinator>,
        sink: LogSink,
    ) -> Result<Self, FetchError> {
        Ok(Self {
            fetcher: Fetcher::new(&config, sink.clone())?,
            runner: ScriptRunner::new(&config.script, sink.clone()),
            coordinator,
            config,
            sink,
        })
    }

    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Exchange a slug for a job description.
    pub fn claim_job(&self, slug: &str) -> Result<JobDescriptor, JobError> {
        self.sink
            .info(format!("Claiming job with temporary slug: {}", slug));

        match self.coordinator.claim_job(slug) {
            Ok(job) => {
                self.sink.info("Job claimed and data received successfully!");
                Ok(job)
            }
            Err(e) => {
                tracing::warn!(stage = Stage::Claim.as_str(), error = %e, "claim failed");
                self.sink.error(format!("Error: {}", e));
                Err(e.into())
            }
        }
    }

    /// Run a claimed job to completion.
    pub fn run_job(&self, job: &JobDescriptor) -> ExecutionOutcome {
        self.run_job_tracked(job).outcome
    }

    /// Run a claimed job and return the confirmed status history too.
    pub fn run_job_tracked(&self, job: &JobDescriptor) -> JobRun {
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("run_job", run_id = %run_id, job_id = %job.id());
        let _guard = span.enter();

        self.sink.clear();
        self.sink
            .info(format!("Starting job for project ID: {}", job.id()));
        let mut status = JobStatusData::claimed(run_id, job.id().clone());

        // Nothing is touched locally until WORKING is acknowledged
        if let Err(error) = self.push_status(&mut status, JobStatus::Working) {
            return self.failed(status, error);
        }

        let result = self
            .execute_steps(job)
            .and_then(|()| self.push_status(&mut status, JobStatus::Completed));
        if let Err(error) = result {
            self.push_failed(&mut status);
            return self.failed(status, error);
        }

        self.sink.success("Job completed successfully!");
        tracing::info!("job completed");

        let finalized = self.finalize(job);
        JobRun {
            outcome: ExecutionOutcome::Success,
            status,
            finalized,
        }
    }

    /// [`claim_job`](Self::claim_job) on a worker thread.
    pub fn spawn_claim(&self, slug: impl Into<String>) -> JobHandle<Result<JobDescriptor, JobError>> {
        let pipeline = self.clone();
        let slug = slug.into();
        JobHandle::spawn(move || pipeline.claim_job(&slug))
    }

    /// [`run_job`](Self::run_job) on a worker thread.
    pub fn spawn_run(&self, job: JobDescriptor) -> JobHandle<ExecutionOutcome> {
        let pipeline = self.clone();
        JobHandle::spawn(move || pipeline.run_job(&job))
    }

    fn execute_steps(&self, job: &JobDescriptor) -> Result<(), JobError> {
        let workspace = WorkspaceHandle::create(&self.config.work_root, job.id())?;
        self.sink.info(format!(
            "Working directory created at: {}",
            workspace.path().display()
        ));

        let source = job.script_source(self.config.script_base_url());
        let script = self.fetcher.fetch_script(&source, workspace.path())?;
        let dataset = self.fetcher.download(job.dataset_url(), workspace.path())?;

        let env = job_env(&workspace, dataset.path());
        let run = self.runner.execute(&script, workspace.path(), &env)?;
        tracing::debug!(stdout_lines = run.stdout_lines, stderr_lines = run.stderr_lines, "script succeeded");
        Ok(())
    }

    /// Ask the coordinator for `target` and record it once acknowledged.
    fn push_status(&self, status: &mut JobStatusData, target: JobStatus) -> Result<(), JobError> {
        status.check(target)?;
        self.sink.info(format!("Updating status to: {}", target));

        match self.coordinator.update_status(&status.job_id, target) {
            Ok(()) => {
                status.transition(target)?;
                tracing::info!(status = %target, "status confirmed");
                self.sink.info(format!("Status updated to: {}", target));
                Ok(())
            }
            Err(source) => {
                tracing::warn!(status = %target, error = %source, "status update failed");
                self.sink.error(format!("Error updating status: {}", source));
                Err(JobError::StatusUpdateFailed {
                    status: target,
                    source,
                })
            }
        }
    }

    /// Single best-effort FAILED push. Its own failure is only logged.
    fn push_failed(&self, status: &mut JobStatusData) {
        if status.status != JobStatus::Working {
            return;
        }
        let _ = self.push_status(status, JobStatus::Failed);
    }

    fn finalize(&self, job: &JobDescriptor) -> bool {
        match self.coordinator.finalize_job(job.id()) {
            Ok(()) => {
                tracing::debug!("job finalized");
                true
            }
            Err(e) => {
                tracing::warn!(stage = Stage::Finalize.as_str(), error = %e, "finalize failed");
                self.sink.error(format!("Error finalizing job: {}", e));
                false
            }
        }
    }

    fn failed(&self, status: JobStatusData, error: JobError) -> JobRun {
        let outcome = ExecutionOutcome::failure(error);
        tracing::warn!(stage = ?outcome.stage(), "job failed");
        self.sink
            .error(format!("Job execution failed: {}", outcome.message()));
        JobRun {
            outcome,
            status,
            finalized: false,
        }
    }
}

/// Environment handed to the job script
fn job_env(workspace: &WorkspaceHandle, dataset: Option<&Path>) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("LOOM_JOB_ID".to_string(), workspace.job_id().to_string());
    env.insert(
        "LOOM_WORKSPACE".to_string(),
        workspace.path().display().to_string(),
    );
    if let Some(dataset) = dataset {
        env.insert("LOOM_DATASET_PATH".to_string(), dataset.display().to_string());
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobId;
    use crate::log_sink::LogLevel;
    use crate::mock::{project_payload, CallKind, FailureConfig, MockCoordinator};
    use tempfile::TempDir;

    fn pipeline(mock: &Arc<MockCoordinator>, root: &TempDir) -> JobPipeline {
        let config = WorkerConfig {
            work_root: root.path().to_path_buf(),
            script_base_url: String::new(),
            ..WorkerConfig::default()
        };
        JobPipeline::new(config, mock.clone(), LogSink::new()).unwrap()
    }

    #[test]
    fn test_stage_names_and_codes() {
        assert_eq!(Stage::StatusUpdate.to_string(), "status-update");
        assert_eq!(Stage::Download.as_str(), "download");
        assert_eq!(Stage::Execute.exit_code(), 50);
        assert_eq!(ExecutionOutcome::Success.exit_code(), 0);
    }

    #[test]
    fn test_outcome_message_names_stage_and_cause() {
        let outcome = ExecutionOutcome::failure(JobError::Script(ScriptError::Failed { exit_code: 7 }));
        assert_eq!(outcome.stage(), Some(Stage::Execute));
        assert_eq!(outcome.message(), "[execute] script exited with code 7");
    }

    #[test]
    fn test_claim_logs_progress() {
        let root = TempDir::new().unwrap();
        let mock = Arc::new(MockCoordinator::new().with_job("abc", project_payload("5", "/s.py")));
        let pipeline = pipeline(&mock, &root);

        let job = pipeline.claim_job("abc").unwrap();
        assert_eq!(job.id().as_str(), "5");
        assert_eq!(
            pipeline.sink().lines_at(LogLevel::Info),
            vec![
                "Claiming job with temporary slug: abc",
                "Job claimed and data received successfully!"
            ]
        );
    }

    #[test]
    fn test_unknown_slug_is_claim_not_found() {
        let root = TempDir::new().unwrap();
        let mock = Arc::new(MockCoordinator::new());
        let pipeline = pipeline(&mock, &root);

        let err = pipeline.claim_job("nope").unwrap_err();
        assert_eq!(err.stage(), Stage::Claim);
        assert!(matches!(err, JobError::Claim(ref e) if e.is_claim_not_found()));
        assert_eq!(pipeline.sink().lines_at(LogLevel::Error).len(), 1);
    }

    #[test]
    fn test_working_failure_stops_before_workspace() {
        let root = TempDir::new().unwrap();
        let mock = Arc::new(MockCoordinator::new().with_job("abc", project_payload("5", "/s.py")));
        mock.inject(
            CallKind::UpdateStatus(JobStatus::Working),
            FailureConfig::unreachable("offline"),
        );
        let pipeline = pipeline(&mock, &root);
        let job = pipeline.claim_job("abc").unwrap();

        let run = pipeline.run_job_tracked(&job);
        assert_eq!(run.outcome.stage(), Some(Stage::StatusUpdate));
        assert_eq!(run.status.status, JobStatus::Claimed);
        assert!(!run.finalized);
        // No FAILED push, no workspace
        assert_eq!(mock.status_pushes(&JobId::new("5")), vec![JobStatus::Working]);
        assert!(!root.path().join("5").exists());
    }

    #[test]
    fn test_job_env() {
        let root = TempDir::new().unwrap();
        let workspace = WorkspaceHandle::create(root.path(), &JobId::new("8")).unwrap();

        let env = job_env(&workspace, None);
        assert_eq!(env["LOOM_JOB_ID"], "8");
        assert!(!env.contains_key("LOOM_DATASET_PATH"));

        let data = workspace.file("data.csv");
        let env = job_env(&workspace, Some(&data));
        assert_eq!(env["LOOM_DATASET_PATH"], data.display().to_string());
    }
}
