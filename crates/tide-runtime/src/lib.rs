//! Runtime for supervising a vLLM server process.
//!
//! This crate provides the OS- and network-facing pieces behind the
//! [`Supervisor`]: spawning into a dedicated process group, draining the
//! child's output, HTTP readiness polling, and exit-hook cleanup.
//!
//! # Structure
//!
//! - `process` - Spawn, liveness and process-group signalling
//! - `drain` - Background log forwarding
//! - `readiness` - Model-listing readiness probe
//! - `supervisor` - State machine and host-facing API
//! - `cleanup` - SIGINT/SIGTERM and drop hooks
//! - `monitor` - Periodic health checks
//! - `sinks` - Log sink implementations

pub mod cleanup;
pub mod drain;
pub mod monitor;
pub mod process;
pub mod readiness;
pub mod sinks;
pub mod supervisor;

pub use cleanup::ExitHook;
pub use drain::{LogDrain, MAX_LINE_BYTES};
pub use monitor::spawn_health_monitor;
pub use process::{ManagedProcess, ShutdownOutcome, SignalKind, WaitError};
pub use readiness::{Liveness, PollOutcome, ProbeSchedule, ReadinessProbe};
pub use sinks::{LogLine, MAX_LOG_LINES, MemoryLogSink, TeeLogSink, TracingLogSink};
pub use supervisor::Supervisor;
