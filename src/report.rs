//! Observable side effects: line-oriented reporting and elapsed time.
//!
//! Components report text events through a [`Reporter`] instead of printing.
//! [`TracingReporter`] forwards lines to `tracing`; [`MemoryReporter`] keeps
//! them so tests can assert on what happened and in which order.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A place to report text events.
pub trait Reporter: Send + Sync {
    /// Report one line of output.
    fn report(&self, line: &str);
}

/// Emits every line as an `info` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, line: &str) {
        tracing::info!(target: "taskweld::report", "{}", line);
    }
}

/// Discards every line.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report(&self, _line: &str) {}
}

/// Collects lines in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryReporter {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryReporter {
    /// Create an empty reporter
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the lines reported so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Number of reported lines that start with `prefix`
    pub fn count_prefixed(&self, prefix: &str) -> usize {
        self.lines
            .lock()
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, line: &str) {
        tracing::trace!(target: "taskweld::report", "{}", line);
        self.lines.lock().push(line.to_string());
    }
}

/// Read-only clock used to annotate output with elapsed time.
///
/// Built on Tokio's clock, so it follows paused time in tests.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started: Instant,
}

impl Stopwatch {
    /// Start a new stopwatch
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Time since the stopwatch started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whole seconds since the stopwatch started
    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed().as_secs()
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::start()
    }
}
