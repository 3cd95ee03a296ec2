//! Error taxonomy surfaced to the host.
//!
//! Only [`StartError`] (wrapping [`SpawnError`]) and [`ReadinessError`] ever
//! reach the caller as failures. Transient poll failures and stop-time
//! signalling problems are absorbed by the runtime and only show up in logs
//! or in the boolean health check.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::state::ProcessState;

/// A [`LaunchSpec`](crate::LaunchSpec) that breaks a supervisor invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaunchSpecError {
    #[error("launch program must not be empty")]
    EmptyProgram,

    #[error("bind host must not be empty")]
    EmptyHost,

    #[error("bind port must be non-zero")]
    InvalidPort,

    #[error("readiness identifier must not be empty")]
    EmptyReadinessId,

    #[error("readiness path must start with '/': {0}")]
    InvalidReadinessPath(String),

    #[error("{0} timeout must be greater than zero")]
    ZeroTimeout(&'static str),
}

/// Failure to create the child process.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The executable could not be resolved on `PATH` (or as a path).
    #[error(
        "executable not found: {program}. Install it or disable auto_start and run the server yourself"
    )]
    ExecutableNotFound { program: String },

    /// The configured working directory does not exist.
    #[error("working directory does not exist: {}", .path.display())]
    WorkingDirMissing { path: PathBuf },

    /// Any other OS-level spawn failure.
    #[error("failed to spawn {program}: {source}")]
    OsFailure {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors returned by `Supervisor::new` and `Supervisor::start`.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("invalid launch spec: {0}")]
    InvalidSpec(#[from] LaunchSpecError),

    #[error("failed to build readiness HTTP client: {0}")]
    HttpClient(String),

    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

/// Terminal outcomes of waiting for readiness, other than success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadinessError {
    /// The child exited before it reported the model as loaded.
    #[error("server process died during startup ({})", exit_label(.code))]
    ProcessDiedDuringStartup {
        /// Exit code, or `None` when the process was killed by a signal.
        code: Option<i32>,
    },

    /// The model identifier never showed up within the startup timeout.
    #[error("server was not ready within {}s", .timeout.as_secs_f64())]
    StartupTimeout { timeout: Duration },

    /// `stop()` was called while the wait was in progress.
    #[error("readiness wait cancelled by shutdown")]
    Cancelled,

    /// There is no startup in progress to wait for.
    #[error("no startup in progress (state: {state})")]
    NotStarting { state: ProcessState },
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(
        || "terminated by signal".to_string(),
        |c| format!("exit code {c}"),
    )
}
