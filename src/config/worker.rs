//! Typed worker configuration

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Largest accepted download chunk
const MAX_CHUNK_BYTES: usize = 16 * 1024 * 1024;

/// Settings consumed by the coordinator client, fetcher, runner and pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Coordinator API base, e.g. `https://host/api`
    pub api_base_url: String,

    /// Prefix for script paths that are not absolute URLs.
    /// Empty means script paths are local files.
    pub script_base_url: String,

    /// Root directory holding one workspace per job id
    pub work_root: PathBuf,

    pub connect_timeout_seconds: u64,

    /// Whole-request timeout for coordinator calls
    pub request_timeout_seconds: u64,

    /// Whole-request timeout for a single download
    pub download_timeout_seconds: u64,

    /// Read buffer size while streaming downloads to disk
    pub download_chunk_bytes: usize,

    pub script: ScriptConfig,
}

/// How job scripts are launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Interpreter executable
    pub interpreter: String,

    /// Arguments placed before the script path
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment for the child
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl WorkerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_seconds)
    }

    /// Script host, or `None` when script paths are local.
    pub fn script_base_url(&self) -> Option<&str> {
        let base = self.script_base_url.trim();
        (!base.is_empty()).then_some(base)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let api = url::Url::parse(&self.api_base_url).map_err(|e| {
            ConfigError::ValidationError(format!("api_base_url is not a valid URL: {}", e))
        })?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(
                "api_base_url must use http or https".to_string(),
            ));
        }

        if let Some(base) = self.script_base_url() {
            url::Url::parse(base).map_err(|e| {
                ConfigError::ValidationError(format!("script_base_url is not a valid URL: {}", e))
            })?;
        }

        if self.work_root.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "work_root must not be empty".to_string(),
            ));
        }

        check_range("connect_timeout_seconds", self.connect_timeout_seconds, 300)?;
        check_range("request_timeout_seconds", self.request_timeout_seconds, 3600)?;
        check_range("download_timeout_seconds", self.download_timeout_seconds, 86400)?;

        if self.download_chunk_bytes == 0 || self.download_chunk_bytes > MAX_CHUNK_BYTES {
            return Err(ConfigError::ValidationError(format!(
                "download_chunk_bytes must be in (0, {}]",
                MAX_CHUNK_BYTES
            )));
        }

        if self.script.interpreter.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "script.interpreter must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

fn check_range(key: &str, value: u64, max: u64) -> Result<(), ConfigError> {
    if value == 0 || value > max {
        return Err(ConfigError::ValidationError(format!(
            "{} must be in (0, {}]",
            key, max
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_base_url_empty_means_local() {
        let mut config = WorkerConfig::default();
        config.script_base_url = "  ".to_string();
        assert_eq!(config.script_base_url(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_api_url() {
        let mut config = WorkerConfig::default();
        config.api_base_url = "not a url".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("api_base_url"));

        config.api_base_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let mut config = WorkerConfig::default();
        config.request_timeout_seconds = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("request_timeout_seconds"));
    }

    #[test]
    fn test_rejects_oversized_chunk() {
        let mut config = WorkerConfig::default();
        config.download_chunk_bytes = MAX_CHUNK_BYTES + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_interpreter() {
        let mut config = WorkerConfig::default();
        config.script.interpreter = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durations() {
        let config = WorkerConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.download_timeout(), Duration::from_secs(600));
    }
}
