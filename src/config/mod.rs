//! Worker configuration
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. Host config (~/.config/loom/worker.toml)
//! 3. Explicit config file (--config)
//! 4. CLI flags and LOOM_* environment variables

mod defaults;
mod effective;
mod worker;

pub use defaults::{
    DEFAULT_API_BASE_URL, DEFAULT_INTERPRETER, DEFAULT_SCRIPT_BASE_URL, DEFAULT_WORK_ROOT,
};
pub use effective::{ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig};
pub use worker::{ScriptConfig, WorkerConfig};
