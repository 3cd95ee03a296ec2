//! Spawning the child and the narrow handle used to watch and signal it.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tide_core::{LaunchSpec, ProcessRecord, SpawnError};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::signal::{SignalKind, signal_group};

/// Error from [`ManagedProcess::wait`].
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("process still running after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A spawned child that leads its own process group.
///
/// Owned exclusively by the supervisor; nothing else may signal or wait on
/// the pid.
#[derive(Debug)]
pub struct ManagedProcess {
    child: Child,
    record: ProcessRecord,
    exit_status: Option<ExitStatus>,
}

/// Spawn the child described by `spec`.
///
/// The program is resolved with the standard `PATH` lookup and started with
/// the launch arguments verbatim (no shell). On Unix the child becomes the
/// leader of a new process group so a single signal reaches anything it
/// forks. stdin is closed; stdout and stderr are piped for the log drain.
pub fn spawn(spec: &LaunchSpec) -> Result<ManagedProcess, SpawnError> {
    let program = resolve_program(spec)?;

    if let Some(dir) = spec.working_dir() {
        if !dir.is_dir() {
            return Err(SpawnError::WorkingDirMissing {
                path: dir.to_path_buf(),
            });
        }
    }

    info!(command = %spec.command_line(), "Starting {}", spec.name());

    let mut cmd = Command::new(&program);
    cmd.args(spec.args())
        .envs(spec.env())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);

    if let Some(dir) = spec.working_dir() {
        cmd.current_dir(dir);
    }

    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd.spawn().map_err(|e| spawn_error(spec, e))?;
    let pid = child.id().ok_or_else(|| SpawnError::OsFailure {
        program: spec.program().display().to_string(),
        source: io::Error::other("child exited before its pid could be read"),
    })?;

    // process_group(0) makes the child its own group leader.
    let record = ProcessRecord::new(pid, pid);
    info!(pid, pgid = record.pgid, "{} started", spec.name());

    Ok(ManagedProcess {
        child,
        record,
        exit_status: None,
    })
}

fn resolve_program(spec: &LaunchSpec) -> Result<PathBuf, SpawnError> {
    which::which(spec.program()).map_err(|e| {
        debug!(program = %spec.program().display(), error = %e, "Executable lookup failed");
        SpawnError::ExecutableNotFound {
            program: spec.program().display().to_string(),
        }
    })
}

fn spawn_error(spec: &LaunchSpec, e: io::Error) -> SpawnError {
    let program = spec.program().display().to_string();
    if e.kind() == io::ErrorKind::NotFound {
        SpawnError::ExecutableNotFound { program }
    } else {
        SpawnError::OsFailure { program, source: e }
    }
}

impl ManagedProcess {
    pub const fn record(&self) -> &ProcessRecord {
        &self.record
    }

    pub const fn pid(&self) -> u32 {
        self.record.pid
    }

    /// Hand the output pipes to the log drain. Returns `None`s after the first call.
    pub fn take_output(&mut self) -> (Option<ChildStdout>, Option<ChildStderr>) {
        (self.child.stdout.take(), self.child.stderr.take())
    }

    /// Non-blocking liveness check.
    ///
    /// Once the child has exited its status is kept, so later calls and
    /// [`wait`](Self::wait) keep reporting the same outcome.
    pub fn is_alive(&mut self) -> bool {
        if self.exit_status.is_some() {
            return false;
        }

        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.observe_exit(status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!(pid = self.record.pid, error = %e, "Error checking process");
                false
            }
        }
    }

    /// Exit code observed so far (`None` while running or when signalled).
    pub const fn exit_code(&self) -> Option<i32> {
        self.record.exit_code
    }

    /// Deliver `kind` to the child's whole process group.
    #[cfg(unix)]
    pub fn signal(&mut self, kind: SignalKind) -> io::Result<()> {
        signal_group(self.record.pgid, kind)
    }

    /// Without process groups the best we can do is kill the child itself.
    #[cfg(not(unix))]
    pub fn signal(&mut self, kind: SignalKind) -> io::Result<()> {
        match signal_group(self.record.pgid, kind) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Unsupported => self.kill_leader(),
            Err(e) => Err(e),
        }
    }

    /// Force-kill the immediate child only. Fallback when group delivery fails.
    pub fn kill_leader(&mut self) -> io::Result<()> {
        if self.exit_status.is_some() {
            return Ok(());
        }
        self.child.start_kill()
    }

    /// Wait for the child to exit, optionally bounded by `timeout`.
    pub async fn wait(&mut self, timeout: Option<Duration>) -> Result<ExitStatus, WaitError> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }

        let status = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.child.wait())
                .await
                .map_err(|_| WaitError::Timeout(limit))??,
            None => self.child.wait().await?,
        };

        self.observe_exit(status);
        Ok(status)
    }

    fn observe_exit(&mut self, status: ExitStatus) {
        debug!(pid = self.record.pid, ?status, "Process exited");
        self.exit_status = Some(status);
        self.record.exit_code = status.code();
    }
}
