//! Per-job working directories
//!
//! `<work_root>/<job_id>/` holds a job's downloads and whatever its script
//! writes. Creation is idempotent and nothing here ever deletes a workspace.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::job::JobId;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("job id {0:?} cannot be used as a directory name")]
    InvalidJobId(String),

    #[error("failed to create workspace {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A created workspace directory bound to one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceHandle {
    job_id: JobId,
    path: PathBuf,
}

impl WorkspaceHandle {
    /// Create (or reuse) the workspace for `job_id` under `work_root`.
    ///
    /// The returned path is absolute so it stays valid as a child process's
    /// working directory.
    pub fn create(work_root: &Path, job_id: &JobId) -> Result<Self, WorkspaceError> {
        let name = job_id.as_str();
        if !is_safe_component(name) {
            return Err(WorkspaceError::InvalidJobId(name.to_string()));
        }

        let path = work_root.join(name);
        fs::create_dir_all(&path).map_err(|source| WorkspaceError::Create {
            path: path.clone(),
            source,
        })?;
        let path = fs::canonicalize(&path).map_err(|source| WorkspaceError::Create {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            job_id: job_id.clone(),
            path,
        })
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a file directly inside the workspace
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

/// A single, non-traversing path component
pub(crate) fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(|c| matches!(c, '/' | '\\' | '\0'))
}
