//! Core domain types and ports for supervising a vLLM inference server.
//!
//! This crate holds no OS or network code. It describes *what* should be
//! launched ([`LaunchSpec`]), the lifecycle it moves through
//! ([`ProcessState`]), the errors surfaced to the host, and the log sink
//! port the runtime writes child output to.

pub mod config;
pub mod error;
pub mod launch;
pub mod ports;
pub mod state;

pub use config::VllmConfig;
pub use error::{LaunchSpecError, ReadinessError, SpawnError, StartError};
pub use launch::{LaunchSpec, LaunchSpecBuilder};
pub use ports::{LogSinkPort, NoopLogSink, OutputStream};
pub use state::{ProcessRecord, ProcessState};
