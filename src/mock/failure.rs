//! Failure injection for the mock coordinator

use std::collections::HashMap;
use std::time::Duration;

use loom_protocol::JobStatus;

use crate::coordinator::CoordinatorError;

/// Which coordinator call a failure applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Claim,
    /// A status push carrying this particular status
    UpdateStatus(JobStatus),
    Finalize,
}

/// Failure configuration for a call kind
#[derive(Debug, Clone)]
pub struct FailureConfig {
    /// Error to return (if any)
    pub error: Option<CoordinatorError>,
    /// Delay to add before responding
    pub delay: Option<Duration>,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailureConfig {
    /// Create a config that returns an error
    pub fn error(error: CoordinatorError) -> Self {
        Self {
            error: Some(error),
            delay: None,
            fail_count: None,
        }
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::error(CoordinatorError::Unreachable(message.into()))
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::error(CoordinatorError::Protocol(message.into()))
    }

    /// Create a config that just adds delay
    pub fn delay(duration: Duration) -> Self {
        Self {
            error: None,
            delay: Some(duration),
            fail_count: None,
        }
    }

    /// Set the number of times to fail before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }
}

/// Failure injector for the mock coordinator
#[derive(Debug, Default)]
pub struct FailureInjector {
    configs: HashMap<CallKind, FailureConfig>,
    /// Call counts per kind (for fail_count tracking)
    call_counts: HashMap<CallKind, u32>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a failure for a call kind
    pub fn inject(&mut self, kind: CallKind, config: FailureConfig) {
        self.configs.insert(kind, config);
        self.call_counts.insert(kind, 0);
    }

    pub fn clear(&mut self) {
        self.configs.clear();
        self.call_counts.clear();
    }

    pub fn clear_kind(&mut self, kind: CallKind) {
        self.configs.remove(&kind);
        self.call_counts.remove(&kind);
    }

    /// Returns the failure config if this call should be affected
    pub fn check(&mut self, kind: CallKind) -> Option<&FailureConfig> {
        let config = self.configs.get(&kind)?;
        let count = self.call_counts.entry(kind).or_insert(0);
        *count += 1;

        if let Some(fail_limit) = config.fail_count {
            if *count > fail_limit {
                return None; // Exceeded fail count, succeed now
            }
        }

        Some(config)
    }
}
