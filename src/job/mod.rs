//! Claimed job description
//!
//! A [`JobDescriptor`] is built once from the coordinator's claim response and
//! passed by value from `claim_job` to `run_job`. It has no setters.

use std::fmt;
use std::path::PathBuf;

use loom_protocol::ProjectPayload;
use serde::Serialize;
use thiserror::Error;

pub use loom_protocol::ProjectId as JobId;

/// Errors turning a claim payload into a descriptor
#[derive(Debug, Error, PartialEq)]
pub enum DescriptorError {
    #[error("project {0} has no script_path")]
    MissingScript(JobId),

    #[error("price must be a non-negative number, got {0}")]
    InvalidPrice(f64),
}

/// Non-negative job price.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Price(f64);

impl Price {
    pub fn new(value: f64) -> Result<Self, DescriptorError> {
        if !value.is_finite() || value < 0.0 {
            return Err(DescriptorError::InvalidPrice(value));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} $", self.0)
    }
}

/// Where the job's script comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    /// Download from this URL
    Remote(String),
    /// Run a file already on this machine
    Local(PathBuf),
}

/// An immutable claimed job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobDescriptor {
    id: JobId,
    title: Option<String>,
    kind: Option<String>,
    price: Price,
    dataset_url: Option<String>,
    script_ref: String,
}

impl JobDescriptor {
    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    pub fn price(&self) -> Price {
        self.price
    }

    /// Dataset URL, if the job has one
    pub fn dataset_url(&self) -> Option<&str> {
        self.dataset_url.as_deref()
    }

    /// Script reference exactly as the coordinator sent it
    pub fn script_ref(&self) -> &str {
        &self.script_ref
    }

    /// Resolve the script reference.
    ///
    /// Absolute http(s) URLs are used as-is. Anything else is appended to
    /// `script_base_url` when one is configured, and is a local path otherwise.
    pub fn script_source(&self, script_base_url: Option<&str>) -> ScriptSource {
        let reference = self.script_ref.trim();

        if let Ok(url) = url::Url::parse(reference) {
            if matches!(url.scheme(), "http" | "https") {
                return ScriptSource::Remote(reference.to_string());
            }
        }

        match script_base_url {
            Some(base) => {
                let base = base.trim_end_matches('/');
                let path = reference.trim_start_matches('/');
                ScriptSource::Remote(format!("{}/{}", base, path))
            }
            None => ScriptSource::Local(PathBuf::from(reference)),
        }
    }
}

impl TryFrom<ProjectPayload> for JobDescriptor {
    type Error = DescriptorError;

    fn try_from(project: ProjectPayload) -> Result<Self, Self::Error> {
        let script_ref = match project.script_path {
            Some(path) if !path.trim().is_empty() => path,
            _ => return Err(DescriptorError::MissingScript(project.id)),
        };

        Ok(Self {
            price: Price::new(project.price.unwrap_or(0.0))?,
            title: project.title,
            kind: project.kind,
            dataset_url: project.cloud_link.filter(|link| !link.trim().is_empty()),
            script_ref,
            id: project.id,
        })
    }
}
