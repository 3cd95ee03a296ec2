//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces the supervisor expects from the host.
//! They contain no implementation details.

pub mod log_sink;

pub use log_sink::{LogSinkPort, NoopLogSink, OutputStream};
