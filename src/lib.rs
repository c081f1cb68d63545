//! Loom Worker - single-node job worker
//!
//! Claims a job from the Loom coordinator with a one-time slug, downloads its
//! script and dataset into a per-job workspace, runs the script while
//! streaming its output into a [`LogSink`], and reports
//! CLAIMED → WORKING → COMPLETED/FAILED back to the coordinator.

pub mod config;
pub mod coordinator;
pub mod fetch;
pub mod job;
pub mod log_sink;
pub mod mock;
pub mod pipeline;
pub mod script;
pub mod state;
pub mod workspace;

pub use config::{ConfigError, EffectiveConfig, WorkerConfig};
pub use coordinator::{Coordinator, CoordinatorError, HttpCoordinator};
pub use fetch::{FetchError, Fetcher};
pub use job::{JobDescriptor, JobId};
pub use log_sink::{LogLevel, LogLine, LogSink};
pub use loom_protocol::JobStatus;
pub use pipeline::{ExecutionOutcome, JobError, JobHandle, JobPipeline, JobRun, Stage};
pub use script::{ScriptError, ScriptRunner};
pub use workspace::{WorkspaceError, WorkspaceHandle};
