//! Ordered, leveled job log shared between the pipeline and its observers
//!
//! The pipeline (and the two output drainers of a running script) append
//! lines; a presentation context reads them with a cursor. Readers see lines
//! in exactly the order `append` calls acquired the lock.
//!
//! ## Cursors and clearing
//!
//! A [`LogCursor`] is an `(epoch, offset)` pair. `clear()` bumps the epoch, so
//! a reader holding a cursor from before the clear gets `reset = true` and the
//! new stream from the start instead of silently skipping lines.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Level of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
    /// A command about to be executed
    Command,
    /// A line from the script's standard output
    Stdout,
    /// A line from the script's standard error
    Stderr,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Success => "success",
            LogLevel::Command => "command",
            LogLevel::Stdout => "stdout",
            LogLevel::Stderr => "stderr",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub level: LogLevel,
    pub text: String,
}

/// Reader position in the sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogCursor {
    epoch: u64,
    offset: usize,
}

/// Lines returned by a read.
#[derive(Debug, Clone, Default)]
pub struct LogBatch {
    /// New lines since the cursor, in append order
    pub lines: Vec<LogLine>,
    /// Cursor to pass to the next read
    pub cursor: LogCursor,
    /// The sink was cleared since the cursor was taken
    pub reset: bool,
}

impl LogBatch {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && !self.reset
    }
}

#[derive(Debug, Default)]
struct SinkState {
    epoch: u64,
    lines: Vec<LogLine>,
}

#[derive(Debug, Default)]
struct SinkInner {
    state: Mutex<SinkState>,
    changed: Condvar,
}

/// Append-only log stream. Cloning yields another handle to the same stream.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    inner: Arc<SinkInner>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        // A panicking appender cannot leave the Vec half-written.
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a line.
    pub fn append(&self, level: LogLevel, text: impl Into<String>) {
        let text = text.into();
        tracing::trace!(target: "loom_worker::log_sink", level = %level, "{}", text);
        {
            let mut state = self.lock();
            state.lines.push(LogLine { level, text });
        }
        self.inner.changed.notify_all();
    }

    pub fn info(&self, text: impl Into<String>) {
        self.append(LogLevel::Info, text);
    }

    pub fn warning(&self, text: impl Into<String>) {
        self.append(LogLevel::Warning, text);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.append(LogLevel::Error, text);
    }

    pub fn success(&self, text: impl Into<String>) {
        self.append(LogLevel::Success, text);
    }

    pub fn command(&self, text: impl Into<String>) {
        self.append(LogLevel::Command, text);
    }

    /// Drop every line and start a new epoch.
    pub fn clear(&self) {
        {
            let mut state = self.lock();
            state.lines.clear();
            state.epoch += 1;
        }
        self.inner.changed.notify_all();
    }

    /// Copy of the current stream.
    pub fn snapshot(&self) -> Vec<LogLine> {
        self.lock().lines.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cursor positioned at the start of the current epoch.
    pub fn cursor(&self) -> LogCursor {
        LogCursor {
            epoch: self.lock().epoch,
            offset: 0,
        }
    }

    /// Lines appended after `cursor`, without blocking.
    pub fn read_from(&self, cursor: LogCursor) -> LogBatch {
        let state = self.lock();
        Self::collect(&state, cursor)
    }

    /// Like [`read_from`](Self::read_from), but waits up to `timeout` for
    /// something new to arrive when there is nothing to return yet.
    pub fn wait_from(&self, cursor: LogCursor, timeout: Duration) -> LogBatch {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            let batch = Self::collect(&state, cursor);
            if !batch.is_empty() {
                return batch;
            }
            let now = Instant::now();
            if now >= deadline {
                return batch;
            }
            let (guard, _) = self
                .inner
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    fn collect(state: &SinkState, cursor: LogCursor) -> LogBatch {
        let reset = cursor.epoch != state.epoch;
        let start = if reset {
            0
        } else {
            cursor.offset.min(state.lines.len())
        };
        LogBatch {
            lines: state.lines[start..].to_vec(),
            cursor: LogCursor {
                epoch: state.epoch,
                offset: state.lines.len(),
            },
            reset,
        }
    }

    /// Lines at `level`, in order.
    pub fn lines_at(&self, level: LogLevel) -> Vec<String> {
        self.lock()
            .lines
            .iter()
            .filter(|l| l.level == level)
            .map(|l| l.text.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_append_preserves_order() {
        let sink = LogSink::new();
        sink.info("one");
        sink.warning("two");
        sink.append(LogLevel::Stdout, "three");

        let lines = sink.snapshot();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], LogLine { level: LogLevel::Info, text: "one".into() });
        assert_eq!(lines[1].level, LogLevel::Warning);
        assert_eq!(lines[2].text, "three");
    }

    #[test]
    fn test_cursor_reads_only_new_lines() {
        let sink = LogSink::new();
        sink.info("a");
        let first = sink.read_from(sink.cursor());
        assert_eq!(first.lines.len(), 1);
        assert!(!first.reset);

        sink.info("b");
        sink.info("c");
        let second = sink.read_from(first.cursor);
        let texts: Vec<_> = second.lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["b", "c"]);

        let third = sink.read_from(second.cursor);
        assert!(third.is_empty());
    }

    #[test]
    fn test_clear_resets_readers() {
        let sink = LogSink::new();
        sink.info("old");
        let batch = sink.read_from(sink.cursor());

        sink.clear();
        assert!(sink.is_empty());
        sink.info("new");

        let after = sink.read_from(batch.cursor);
        assert!(after.reset);
        assert_eq!(after.lines.len(), 1);
        assert_eq!(after.lines[0].text, "new");
    }

    #[test]
    fn test_wait_from_times_out_empty() {
        let sink = LogSink::new();
        let batch = sink.wait_from(sink.cursor(), Duration::from_millis(20));
        assert!(batch.is_empty());
    }

    #[test]
    fn test_wait_from_wakes_on_append() {
        let sink = LogSink::new();
        let cursor = sink.cursor();
        let writer = sink.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.success("done");
        });

        let batch = sink.wait_from(cursor, Duration::from_secs(5));
        handle.join().unwrap();
        assert_eq!(batch.lines.len(), 1);
        assert_eq!(batch.lines[0].level, LogLevel::Success);
    }

    #[test]
    fn test_concurrent_writers_keep_per_writer_order() {
        let sink = LogSink::new();
        let handles: Vec<_> = (0..4)
            .map(|writer| {
                let sink = sink.clone();
                thread::spawn(move || {
                    for i in 0..500 {
                        sink.info(format!("{}:{}", writer, i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let lines = sink.snapshot();
        assert_eq!(lines.len(), 2000);
        for writer in 0..4 {
            let seen: Vec<usize> = lines
                .iter()
                .filter_map(|l| {
                    let (w, i) = l.text.split_once(':')?;
                    (w == writer.to_string()).then(|| i.parse().unwrap())
                })
                .collect();
            assert_eq!(seen, (0..500).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_lines_at_filters_level() {
        let sink = LogSink::new();
        sink.warning("w1");
        sink.info("i1");
        sink.warning("w2");
        assert_eq!(sink.lines_at(LogLevel::Warning), vec!["w1", "w2"]);
    }
}
