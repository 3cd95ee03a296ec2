//! Log sink port for child process output.
//!
//! This port abstracts the destination for the child's stdout/stderr lines,
//! allowing the host to route them to tracing, an in-memory buffer, or both.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which pipe of the child a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Port for appending child log lines to a sink.
///
/// Implementations must be safe for concurrent writers and must not block
/// for long: the log drain calls this inline while the child keeps writing.
pub trait LogSinkPort: Send + Sync {
    /// Append one line of child output.
    ///
    /// # Arguments
    ///
    /// * `source` - Name of the child the line belongs to
    /// * `stream` - Pipe the line was read from
    /// * `line` - The line content (without trailing newline)
    fn append(&self, source: &str, stream: OutputStream, line: String);
}

/// A sink that discards every line.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogSink;

impl LogSinkPort for NoopLogSink {
    fn append(&self, _source: &str, _stream: OutputStream, _line: String) {}
}
