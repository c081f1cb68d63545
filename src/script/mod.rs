//! Script execution with streamed output
//!
//! The child's stdout and stderr are each drained by their own thread into
//! the [`LogSink`] while the runner waits on the child. Both pipes are read
//! concurrently so a script filling one of them cannot stall on the other.

use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use thiserror::Error;

use crate::config::ScriptConfig;
use crate::log_sink::{LogLevel, LogSink};

/// Script execution errors
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to start {program}: {cause}")]
    SpawnFailed { program: String, cause: String },

    #[error("script exited with code {exit_code}")]
    Failed { exit_code: i32 },

    #[error("script terminated by signal {}", .signal.map_or_else(|| "unknown".to_string(), |s| s.to_string()))]
    Killed { signal: Option<i32> },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ScriptError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ScriptError::Failed { exit_code } => Some(*exit_code),
            _ => None,
        }
    }
}

/// Lines captured from a finished script
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptRun {
    pub stdout_lines: usize,
    pub stderr_lines: usize,
}

/// Runs job scripts through the configured interpreter
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    interpreter: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    sink: LogSink,
}

impl ScriptRunner {
    pub fn new(config: &ScriptConfig, sink: LogSink) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            sink,
        }
    }

    /// Command line as shown in the job log
    pub fn command_line(&self, script_path: &Path) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 2);
        parts.push(self.interpreter.clone());
        parts.extend(self.args.iter().cloned());
        parts.push(script_path.display().to_string());
        parts.join(" ")
    }

    /// Run `script_path` with `work_dir` as working directory.
    ///
    /// `job_env` is applied on top of the configured environment. Exit code 0
    /// is success whatever the script wrote to stderr.
    pub fn execute(
        &self,
        script_path: &Path,
        work_dir: &Path,
        job_env: &BTreeMap<String, String>,
    ) -> Result<ScriptRun, ScriptError> {
        self.sink
            .command(format!("Running script: {}", self.command_line(script_path)));

        let mut child = Command::new(&self.interpreter)
            .args(&self.args)
            .arg(script_path)
            .current_dir(work_dir)
            .envs(&self.env)
            .envs(job_env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ScriptError::SpawnFailed {
                program: self.interpreter.clone(),
                cause: e.to_string(),
            })?;
        tracing::debug!(pid = child.id(), script = %script_path.display(), "script started");

        let stdout = child.stdout.take().map(|s| drain(s, LogLevel::Stdout, self.sink.clone()));
        let stderr = child.stderr.take().map(|s| drain(s, LogLevel::Stderr, self.sink.clone()));

        let status = child.wait();

        // Join before inspecting the status so every line is in the sink
        let run = ScriptRun {
            stdout_lines: join_count(stdout),
            stderr_lines: join_count(stderr),
        };
        let status = status?;
        tracing::debug!(?status, stdout_lines = run.stdout_lines, stderr_lines = run.stderr_lines, "script finished");

        classify(status)?;
        Ok(run)
    }
}

/// Forward `stream` to the sink line by line, returning the line count.
///
/// Invalid UTF-8 is replaced rather than ending the drain, so the pipe is
/// always read to EOF.
fn drain<R>(stream: R, level: LogLevel, sink: LogSink) -> JoinHandle<usize>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        let mut count = 0;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    sink.append(level, line.trim_end_matches(|c: char| c == '\n' || c == '\r'));
                    count += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(stream = %level, error = %e, "stopped reading script output");
                    break;
                }
            }
        }
        count
    })
}

fn join_count(handle: Option<JoinHandle<usize>>) -> usize {
    handle.and_then(|h| h.join().ok()).unwrap_or(0)
}

fn classify(status: ExitStatus) -> Result<(), ScriptError> {
    if status.success() {
        return Ok(());
    }
    if let Some(exit_code) = status.code() {
        return Err(ScriptError::Failed { exit_code });
    }

    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;

    Err(ScriptError::Killed { signal })
}
