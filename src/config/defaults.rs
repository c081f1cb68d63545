//! Built-in defaults (layer 1)

use std::collections::BTreeMap;

use super::worker::{ScriptConfig, WorkerConfig};

/// Public Loom coordinator
pub const DEFAULT_API_BASE_URL: &str = "https://the-loom-pqy4.onrender.com/api";

/// Host serving uploaded job scripts
pub const DEFAULT_SCRIPT_BASE_URL: &str = "http://localhost:3000";

/// Root directory for per-job workspaces
pub const DEFAULT_WORK_ROOT: &str = "worker_jobs";

pub const DEFAULT_INTERPRETER: &str = "python3";

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            script_base_url: DEFAULT_SCRIPT_BASE_URL.to_string(),
            work_root: DEFAULT_WORK_ROOT.into(),
            connect_timeout_seconds: 10,
            request_timeout_seconds: 30,
            download_timeout_seconds: 600,
            download_chunk_bytes: 8192,
            script: ScriptConfig::default(),
        }
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        // Python block-buffers stdout when it is a pipe; lines would only
        // arrive at exit without this.
        let mut env = BTreeMap::new();
        env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());

        Self {
            interpreter: DEFAULT_INTERPRETER.to_string(),
            args: Vec::new(),
            env,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let defaults = WorkerConfig::default();
        assert_eq!(defaults.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(defaults.work_root.to_str(), Some("worker_jobs"));
        assert_eq!(defaults.download_chunk_bytes, 8192);
        assert_eq!(defaults.script.interpreter, "python3");
        assert_eq!(
            defaults.script.env.get("PYTHONUNBUFFERED").map(String::as_str),
            Some("1")
        );
        assert!(defaults.validate().is_ok());
    }

    #[test]
    fn test_to_value() {
        let value = serde_json::to_value(WorkerConfig::default()).unwrap();

        assert_eq!(value["request_timeout_seconds"], 30);
        assert_eq!(value["script"]["interpreter"], "python3");
        assert_eq!(value["script_base_url"], DEFAULT_SCRIPT_BASE_URL);
    }
}
