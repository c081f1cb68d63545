//! HTTP coordinator client
//!
//! - `GET  {base}/jobs/claim/{slug}` returns a [`ClaimResponse`]
//! - `PUT  {base}/projects/{id}` with a [`StatusUpdate`] body
//!
//! Calls are blocking and bounded by the configured connect and request
//! timeouts. Nothing is retried.

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use url::Url;

use loom_protocol::{routes, ClaimResponse, JobStatus, StatusUpdate};

use super::{Coordinator, CoordinatorError};
use crate::config::WorkerConfig;
use crate::job::{JobDescriptor, JobId};

/// Longest response body excerpt carried in an error message
const BODY_EXCERPT_CHARS: usize = 200;

/// Coordinator reached over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpCoordinator {
    client: Client,
    base_url: Url,
}

impl HttpCoordinator {
    /// Build a client from the worker configuration.
    pub fn new(config: &WorkerConfig) -> Result<Self, CoordinatorError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| CoordinatorError::Protocol(format!("failed to build HTTP client: {}", e)))?;
        Self::with_client(&config.api_base_url, client)
    }

    /// Use an already configured client.
    pub fn with_client(api_base_url: &str, client: Client) -> Result<Self, CoordinatorError> {
        let base_url = Url::parse(api_base_url).map_err(|e| {
            CoordinatorError::Protocol(format!("invalid API base URL {:?}: {}", api_base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(CoordinatorError::Protocol(format!(
                "API base URL {:?} cannot carry a path",
                api_base_url
            )));
        }
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append path segments to the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, CoordinatorError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CoordinatorError::Protocol("API base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn put_status(&self, job_id: &JobId, body: &StatusUpdate) -> Result<(), CoordinatorError> {
        let url = self.endpoint(&routes::project_segments(job_id.as_str()))?;
        tracing::debug!(%url, status = %body.status, progress = ?body.progress, "PUT status");

        let response = self
            .client
            .put(url.clone())
            .json(body)
            .send()
            .map_err(|e| unreachable_error(&url, &e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let excerpt = body_excerpt(response);
        tracing::warn!(%url, %status, "status update rejected");
        if status.is_server_error() {
            Err(CoordinatorError::Unreachable(format!(
                "{} returned HTTP {}{}",
                url, status, excerpt
            )))
        } else {
            Err(CoordinatorError::Protocol(format!(
                "status update to {} rejected with HTTP {}{}",
                body.status, status, excerpt
            )))
        }
    }
}

impl Coordinator for HttpCoordinator {
    fn claim_job(&self, slug: &str) -> Result<JobDescriptor, CoordinatorError> {
        if slug.trim().is_empty() {
            return Err(CoordinatorError::ClaimNotFound {
                slug: slug.to_string(),
            });
        }

        let url = self.endpoint(&routes::claim_segments(slug))?;
        tracing::debug!(%url, "GET claim");

        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| unreachable_error(&url, &e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(CoordinatorError::ClaimNotFound {
                slug: slug.to_string(),
            });
        }
        if status.is_server_error() {
            return Err(CoordinatorError::Unreachable(format!(
                "{} returned HTTP {}",
                url, status
            )));
        }

        let body = response
            .text()
            .map_err(|e| CoordinatorError::Unreachable(format!("reading claim response: {}", e)))?;

        if !status.is_success() {
            // Prefer the coordinator's own message when the body carries one
            let message = serde_json::from_str::<ClaimResponse>(&body)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or_else(|| excerpt(&body));
            return Err(CoordinatorError::Protocol(format!(
                "claim rejected with HTTP {}: {}",
                status, message
            )));
        }

        let claim: ClaimResponse = serde_json::from_str(&body)
            .map_err(|e| CoordinatorError::Protocol(format!("malformed claim response: {}", e)))?;
        let project = claim.into_project().map_err(CoordinatorError::Protocol)?;

        let job = JobDescriptor::try_from(project)
            .map_err(|e| CoordinatorError::Protocol(format!("unusable claim response: {}", e)))?;
        tracing::info!(job_id = %job.id(), "job claimed");
        Ok(job)
    }

    fn update_status(&self, job_id: &JobId, status: JobStatus) -> Result<(), CoordinatorError> {
        self.put_status(job_id, &StatusUpdate::new(status))
    }

    fn finalize_job(&self, job_id: &JobId) -> Result<(), CoordinatorError> {
        self.put_status(job_id, &StatusUpdate::finalize())
    }
}

fn unreachable_error(url: &Url, error: &reqwest::Error) -> CoordinatorError {
    tracing::warn!(%url, error = %error, "coordinator request failed");
    CoordinatorError::Unreachable(format!("{}: {}", url, error))
}

fn body_excerpt(response: Response) -> String {
    match response.text() {
        Ok(body) if !body.trim().is_empty() => format!(": {}", excerpt(&body)),
        _ => String::new(),
    }
}

fn excerpt(body: &str) -> String {
    let body = body.trim();
    if body.chars().count() <= BODY_EXCERPT_CHARS {
        return body.to_string();
    }
    let cut: String = body.chars().take(BODY_EXCERPT_CHARS).collect();
    format!("{}...", cut)
}
