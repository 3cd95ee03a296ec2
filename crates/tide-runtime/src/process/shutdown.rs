//! Graceful group shutdown with SIGTERM → SIGKILL escalation.

use std::process::ExitStatus;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::handle::{ManagedProcess, WaitError};
use super::signal::{SignalKind, signal_group};

/// How a [`shutdown_group`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Exited within the grace period after SIGTERM (or had already exited).
    Graceful(ExitStatus),
    /// Needed SIGKILL.
    Killed(ExitStatus),
    /// The final wait failed; the kill guard has re-sent SIGKILL to the group.
    Unconfirmed,
}

/// SIGKILLs a process group when dropped while still armed.
///
/// Armed before teardown starts and disarmed once the exit is confirmed, so
/// a panic or a dropped future in between can't leave the group running.
#[derive(Debug)]
pub struct KillGuard {
    pgid: Option<u32>,
}

impl KillGuard {
    pub const fn arm(pgid: u32) -> Self {
        Self { pgid: Some(pgid) }
    }

    pub fn disarm(mut self) {
        self.pgid = None;
    }
}

impl Drop for KillGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            warn!(pgid, "Teardown interrupted; sending SIGKILL to process group");
            if let Err(e) = signal_group(pgid, SignalKind::Kill) {
                error!(pgid, error = %e, "Failed to SIGKILL process group");
            }
        }
    }
}

/// Shut down the child's process group.
///
/// # Strategy
/// 1. Send SIGTERM to the group and wait up to `grace` for the child to exit
/// 2. If still running, send SIGKILL to the group
/// 3. Wait for reaping with no further timeout (SIGKILL cannot be blocked)
///
/// Signal delivery failures are logged at error level and never returned;
/// the caller always gets to move on.
pub async fn shutdown_group(process: &mut ManagedProcess, grace: Duration) -> ShutdownOutcome {
    let pid = process.pid();
    let guard = KillGuard::arm(process.record().pgid);

    // Phase 1: SIGTERM with grace period
    if let Err(e) = process.signal(SignalKind::Terminate) {
        error!(pid, error = %e, "Failed to send SIGTERM to process group");
    }

    match process.wait(Some(grace)).await {
        Ok(status) => {
            guard.disarm();
            info!(pid, ?status, "Server stopped gracefully");
            return ShutdownOutcome::Graceful(status);
        }
        Err(WaitError::Timeout(_)) => {
            warn!(
                pid,
                grace_secs = grace.as_secs_f64(),
                "Server did not stop within grace period, sending SIGKILL"
            );
        }
        Err(WaitError::Io(e)) => {
            error!(pid, error = %e, "Error waiting for server after SIGTERM");
        }
    }

    // Phase 2: SIGKILL to the group, falling back to the leader alone
    if let Err(e) = process.signal(SignalKind::Kill) {
        error!(pid, error = %e, "Failed to send SIGKILL to process group");
        if let Err(e) = process.kill_leader() {
            error!(pid, error = %e, "Failed to kill server process");
        }
    }

    // Phase 3: reap
    match process.wait(None).await {
        Ok(status) => {
            guard.disarm();
            info!(pid, ?status, "Server force-killed");
            ShutdownOutcome::Killed(status)
        }
        Err(e) => {
            error!(pid, error = %e, "Could not confirm server exit");
            drop(guard);
            debug!(pid, "Kill guard fired");
            ShutdownOutcome::Unconfirmed
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::spawn;
    use tide_core::LaunchSpec;
    use tokio::time::Instant;

    fn sh(script: &str) -> LaunchSpec {
        LaunchSpec::builder("sh", "127.0.0.1", 8000, "test-model")
            .args(["-c", script])
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn shutdown_responds_to_sigterm() {
        let mut process = spawn(&sh("sleep 30")).unwrap();

        let outcome = shutdown_group(&mut process, Duration::from_secs(5)).await;
        assert!(matches!(outcome, ShutdownOutcome::Graceful(_)));
        assert!(!process.is_alive());
    }

    #[tokio::test]
    async fn shutdown_handles_already_exited() {
        let mut process = spawn(&sh("exit 0")).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let outcome = shutdown_group(&mut process, Duration::from_secs(1)).await;
        assert!(matches!(outcome, ShutdownOutcome::Graceful(_)));
    }

    #[tokio::test]
    async fn shutdown_escalates_when_sigterm_ignored() {
        let mut process = spawn(&sh("trap '' TERM; while true; do sleep 0.1; done")).unwrap();
        // Let the shell install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let grace = Duration::from_millis(300);
        let start = Instant::now();
        let outcome = shutdown_group(&mut process, grace).await;

        assert!(matches!(outcome, ShutdownOutcome::Killed(_)));
        assert!(start.elapsed() >= grace);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!process.is_alive());
    }

    #[tokio::test]
    async fn kill_guard_fires_on_drop() {
        let mut process = spawn(&sh("trap '' TERM; sleep 30")).unwrap();
        {
            let _guard = KillGuard::arm(process.record().pgid);
        }
        let status = process.wait(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(status.code(), None);
    }
}
