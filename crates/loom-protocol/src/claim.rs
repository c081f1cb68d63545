//! Claim operation types.
//!
//! `GET {base}/jobs/claim/{slug}` returns a [`ClaimResponse`] whose `project`
//! describes the claimed job.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// Fallback message when the coordinator rejects a claim without saying why.
pub const UNKNOWN_CLAIM_ERROR: &str = "Unknown error while claiming the slug.";

/// Opaque project identifier assigned by the coordinator.
///
/// The coordinator emits database row ids, so the wire form may be a JSON
/// number or a string. Both normalise to the same textual id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Create an id from its textual form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ProjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(serde_json::Number),
        }

        match RawId::deserialize(deserializer)? {
            RawId::Text(text) if text.trim().is_empty() => {
                Err(D::Error::custom("project id must not be empty"))
            }
            RawId::Text(text) => Ok(Self(text)),
            RawId::Number(number) => Ok(Self(number.to_string())),
        }
    }
}

/// Project description carried by a successful claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectPayload {
    /// Project (job) identifier.
    pub id: ProjectId,
    /// Human-readable title.
    #[serde(default)]
    pub title: Option<String>,
    /// Job kind, e.g. "training".
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Offered price.
    #[serde(default)]
    pub price: Option<f64>,
    /// Dataset URL; absent, null and "" all mean "no dataset".
    #[serde(default)]
    pub cloud_link: Option<String>,
    /// Script location, usually a path relative to the coordinator's file host.
    #[serde(default)]
    pub script_path: Option<String>,
}

/// Claim response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimResponse {
    /// Whether the claim succeeded.
    pub success: bool,
    /// Claimed project (present when success=true).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectPayload>,
    /// Error message (present when success=false).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClaimResponse {
    /// Build a successful response.
    pub fn claimed(project: ProjectPayload) -> Self {
        Self {
            success: true,
            project: Some(project),
            error: None,
        }
    }

    /// Build a rejected response.
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            project: None,
            error: Some(error.into()),
        }
    }

    /// Collapse the envelope into the project or the coordinator's message.
    pub fn into_project(self) -> Result<ProjectPayload, String> {
        match (self.success, self.project) {
            (true, Some(project)) => Ok(project),
            (true, None) => Err("claim succeeded but the response carried no project".to_string()),
            (false, _) => Err(self
                .error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_CLAIM_ERROR.to_string())),
        }
    }
}
