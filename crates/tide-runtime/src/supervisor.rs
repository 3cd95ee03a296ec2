//! Supervisor owning the lifecycle of one inference server process.
//!
//! The supervisor owns the process, its log drain and the state machine
//! internally, behind a `tokio::sync::Mutex`. The host holds it in an
//! `Arc` and calls methods on it; nothing else signals or waits on the pid.
//!
//! Key design decisions:
//! - **Readiness outside the lock**: the polling loop only takes the lock
//!   for the liveness re-check, never across a sleep or HTTP request
//! - **Stop under the lock**: `stop()` holds the lock for the whole
//!   teardown, so concurrent stops serialize and the second is a no-op
//! - **Drain before reap**: the log drain is cancelled before the final wait

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tide_core::{
    LaunchSpec, LogSinkPort, ProcessRecord, ProcessState, ReadinessError, StartError,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cleanup::ExitHook;
use crate::drain::LogDrain;
use crate::process::{ManagedProcess, ShutdownOutcome, shutdown_group, spawn};
use crate::readiness::{Liveness, ProbeSchedule, ReadinessProbe};

/// Everything tied to the live child.
#[derive(Debug, Default)]
struct Inner {
    process: Option<ManagedProcess>,
    drain: Option<LogDrain>,
    /// Cancelled by `stop()` to abort an in-flight readiness wait.
    startup: CancellationToken,
    /// Whether the current process's unexpected exit has been reported.
    exit_reported: bool,
}

/// Supervisor for one inference server child process.
///
/// # Example
///
/// ```ignore
/// let supervisor = Arc::new(Supervisor::new(spec, Arc::new(TracingLogSink))?);
/// supervisor.start().await?;
/// supervisor.wait_until_ready(None).await?;
/// assert!(supervisor.health_check().await);
/// supervisor.stop().await;
/// ```
pub struct Supervisor {
    spec: LaunchSpec,
    schedule: ProbeSchedule,
    probe: ReadinessProbe,
    sink: Arc<dyn LogSinkPort>,
    /// Readable without waiting for an in-progress stop.
    state: StdMutex<ProcessState>,
    inner: Mutex<Inner>,
    exit_hook: ExitHook,
}

impl Supervisor {
    /// Create an idle supervisor with the default [`ProbeSchedule`].
    pub fn new(spec: LaunchSpec, sink: Arc<dyn LogSinkPort>) -> Result<Self, StartError> {
        Self::with_schedule(spec, sink, ProbeSchedule::default())
    }

    /// Create an idle supervisor polling on `schedule`.
    pub fn with_schedule(
        spec: LaunchSpec,
        sink: Arc<dyn LogSinkPort>,
        schedule: ProbeSchedule,
    ) -> Result<Self, StartError> {
        spec.validate()?;
        let probe = ReadinessProbe::new(&spec, schedule.request_timeout)
            .map_err(|e| StartError::HttpClient(e.to_string()))?;

        Ok(Self {
            spec,
            schedule,
            probe,
            sink,
            state: StdMutex::new(ProcessState::Idle),
            inner: Mutex::new(Inner::default()),
            exit_hook: ExitHook::new(),
        })
    }

    pub const fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_serving(&self) -> bool {
        matches!(self.state(), ProcessState::Running | ProcessState::Degraded)
    }

    fn set_state(&self, next: ProcessState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            debug!(from = %*state, to = %next, "{} state change", self.spec.name());
            *state = next;
        }
    }

    /// Snapshot of the live process record, if any.
    pub async fn record(&self) -> Option<ProcessRecord> {
        let inner = self.inner.lock().await;
        inner.process.as_ref().map(|p| p.record().clone())
    }

    /// Spawn the server and start draining its output.
    ///
    /// A no-op (with a warning) unless the supervisor is idle, stopped or
    /// failed. A spawn failure moves the supervisor to `Failed`.
    pub async fn start(&self) -> Result<(), StartError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let state = self.state();
        if !state.accepts_start() {
            warn!(%state, "{} is already running, ignoring start", self.spec.name());
            return Ok(());
        }

        let mut process = match spawn(&self.spec) {
            Ok(process) => process,
            Err(e) => {
                error!(error = %e, "Failed to start {}", self.spec.name());
                self.set_state(ProcessState::Failed);
                return Err(e.into());
            }
        };

        let (stdout, stderr) = process.take_output();
        let drain = LogDrain::spawn(self.spec.name(), stdout, stderr, Arc::clone(&self.sink));
        self.exit_hook.arm(process.record().pgid);

        inner.process = Some(process);
        inner.drain = Some(drain);
        inner.startup = CancellationToken::new();
        inner.exit_reported = false;
        self.set_state(ProcessState::Starting);
        Ok(())
    }

    /// Block until the server reports its model, the process dies, the
    /// timeout passes or `stop()` is called.
    ///
    /// `timeout` defaults to the launch spec's startup timeout. Returns
    /// immediately when already `Running`. Death and timeout tear the
    /// process down and leave the supervisor `Failed`.
    pub async fn wait_until_ready(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Duration, ReadinessError> {
        let cancel = {
            let inner = self.inner.lock().await;
            match self.state() {
                ProcessState::Starting => inner.startup.clone(),
                ProcessState::Running => return Ok(Duration::ZERO),
                state => return Err(ReadinessError::NotStarting { state }),
            }
        };

        let timeout = timeout.unwrap_or_else(|| self.spec.startup_timeout());
        let result = self
            .probe
            .wait_until_ready(timeout, &self.schedule, &cancel, || self.startup_liveness())
            .await;

        let mut guard = self.inner.lock().await;
        // stop() (or a stop followed by a restart) owns the outcome now.
        if cancel.is_cancelled() || self.state() != ProcessState::Starting {
            return Err(ReadinessError::Cancelled);
        }

        match result {
            Ok(elapsed) => {
                self.set_state(ProcessState::Running);
                Ok(elapsed)
            }
            Err(e) => {
                error!(error = %e, "{} failed to start", self.spec.name());
                self.teardown(&mut guard).await;
                self.set_state(ProcessState::Failed);
                Err(e)
            }
        }
    }

    async fn startup_liveness(&self) -> Liveness {
        let mut inner = self.inner.lock().await;
        let Some(process) = inner.process.as_mut() else {
            return Liveness::Released;
        };
        if process.is_alive() {
            Liveness::Alive
        } else {
            Liveness::Exited(process.exit_code())
        }
    }

    /// Process liveness AND a readiness query. Never fails.
    ///
    /// Moves `Running` to `Degraded` on failure and back on success. A
    /// process that exited is reported once with its exit code, which stays
    /// on the record until `stop()`.
    pub async fn health_check(&self) -> bool {
        // Answer without the lock while a stop holds it for the teardown.
        if !self.is_serving() {
            return false;
        }
        {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;

            if !self.is_serving() {
                return false;
            }
            let Some(process) = inner.process.as_mut() else {
                return false;
            };
            if !process.is_alive() {
                if !inner.exit_reported {
                    inner.exit_reported = true;
                    error!(
                        pid = process.pid(),
                        exit_code = ?process.exit_code(),
                        "{} process exited unexpectedly",
                        self.spec.name()
                    );
                }
                self.set_state(ProcessState::Degraded);
                return false;
            }
        }

        let outcome = self.probe.poll().await;
        let healthy = outcome.is_ready();

        let _guard = self.inner.lock().await;
        match (self.state(), healthy) {
            (ProcessState::Running, false) => {
                warn!(?outcome, "{} health check failed", self.spec.name());
                self.set_state(ProcessState::Degraded);
            }
            (ProcessState::Degraded, true) => {
                info!("{} recovered", self.spec.name());
                self.set_state(ProcessState::Running);
            }
            _ => {}
        }
        healthy
    }

    /// Stop the server: cancel the drain, SIGTERM the group, wait up to the
    /// shutdown timeout, then SIGKILL and wait for the reap.
    ///
    /// Idempotent, and a no-op when idle, stopped or failed. Returns once the
    /// process is gone; failures along the way are only logged.
    pub async fn stop(&self) {
        let mut guard = self.inner.lock().await;

        let state = self.state();
        if !state.has_process() {
            debug!(%state, "{} not running, nothing to stop", self.spec.name());
            return;
        }

        info!(%state, "Stopping {}", self.spec.name());
        guard.startup.cancel();
        self.set_state(ProcessState::Stopping);
        self.teardown(&mut guard).await;
        self.set_state(ProcessState::Stopped);
        info!("{} stopped", self.spec.name());
    }

    async fn teardown(&self, inner: &mut Inner) {
        if let Some(mut drain) = inner.drain.take() {
            drain.cancel().await;
        }

        if let Some(mut process) = inner.process.take() {
            match shutdown_group(&mut process, self.spec.shutdown_timeout()).await {
                ShutdownOutcome::Graceful(status) | ShutdownOutcome::Killed(status) => {
                    debug!(pid = process.pid(), ?status, "Server process reaped");
                }
                ShutdownOutcome::Unconfirmed => {
                    warn!(pid = process.pid(), "Server exit could not be confirmed");
                }
            }
        }

        self.exit_hook.disarm();
    }

    /// Terminate the child when the host gets SIGINT/SIGTERM.
    ///
    /// Installs the listeners once per supervisor; later calls return the
    /// same token. The token is cancelled after the child's group has been
    /// signalled, and the host should then run its own shutdown (including
    /// `stop()`). Dropping the supervisor also signals a still-running child.
    pub fn register_exit_hooks(&self) -> CancellationToken {
        self.exit_hook.install()
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("name", &self.spec.name())
            .field("state", &self.state())
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}
