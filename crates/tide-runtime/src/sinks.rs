//! Log sink implementations for child output.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tide_core::{LogSinkPort, OutputStream};
use tracing::info;

/// Maximum number of log lines kept by [`MemoryLogSink::new`].
pub const MAX_LOG_LINES: usize = 5000;

/// Forwards every line to `tracing` at info level on target `tide::child`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSinkPort for TracingLogSink {
    fn append(&self, source: &str, stream: OutputStream, line: String) {
        info!(target: "tide::child", %source, %stream, "[{source}] {line}");
    }
}

/// A single captured line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
    pub source: String,
    pub stream: OutputStream,
    pub line: String,
}

/// Ring buffer of the most recent lines, for the host's `/logs` endpoint.
#[derive(Debug)]
pub struct MemoryLogSink {
    lines: Mutex<VecDeque<LogLine>>,
    capacity: usize,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::with_capacity(MAX_LOG_LINES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(MAX_LOG_LINES))),
            capacity: capacity.max(1),
        }
    }

    /// Copy of the buffered lines, oldest first.
    pub fn snapshot(&self) -> Vec<LogLine> {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryLogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSinkPort for MemoryLogSink {
    fn append(&self, source: &str, stream: OutputStream, line: String) {
        let entry = LogLine {
            timestamp: u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default(),
            source: source.to_string(),
            stream,
            line,
        };
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(entry);
    }
}

/// Fans each line out to several sinks, in order.
#[derive(Clone, Default)]
pub struct TeeLogSink {
    sinks: Vec<Arc<dyn LogSinkPort>>,
}

impl TeeLogSink {
    pub fn new(sinks: Vec<Arc<dyn LogSinkPort>>) -> Self {
        Self { sinks }
    }
}

impl LogSinkPort for TeeLogSink {
    fn append(&self, source: &str, stream: OutputStream, line: String) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.append(source, stream, line.clone());
            }
            last.append(source, stream, line);
        }
    }
}

impl std::fmt::Debug for TeeLogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeeLogSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
