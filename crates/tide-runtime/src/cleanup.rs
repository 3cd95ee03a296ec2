//! Ties the child's lifetime to the host process.
//!
//! The hook holds the process group of the live child ("armed"). If the
//! host receives SIGINT/SIGTERM, or the owning supervisor is dropped
//! without a `stop()`, the armed group gets SIGTERM. `stop()` disarms the
//! hook once the child is reaped so a recycled pgid is never signalled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::process::{SignalKind, signal_group};

#[derive(Debug, Default)]
struct Shared {
    /// Armed process group, 0 when disarmed.
    pgid: AtomicU32,
    installed: AtomicBool,
    /// Cancelled when a termination signal reaches the host.
    shutdown: CancellationToken,
}

impl Shared {
    /// Send SIGTERM to the armed group, at most once per arming.
    fn fire(&self, reason: &str) -> bool {
        let pgid = self.pgid.swap(0, Ordering::SeqCst);
        if pgid == 0 {
            return false;
        }
        info!(pgid, reason, "Terminating server process group on host exit");
        if let Err(e) = signal_group(pgid, SignalKind::Terminate) {
            error!(pgid, error = %e, "Failed to signal server process group on exit");
        }
        true
    }
}

/// Exit/signal hook for one supervisor.
#[derive(Debug)]
pub struct ExitHook {
    shared: Arc<Shared>,
    /// Stops the signal listener task when the hook goes away.
    listener: CancellationToken,
}

impl ExitHook {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            listener: CancellationToken::new(),
        }
    }

    pub fn arm(&self, pgid: u32) {
        self.shared.pgid.store(pgid, Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.shared.pgid.store(0, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.shared.pgid.load(Ordering::SeqCst) != 0
    }

    pub fn is_installed(&self) -> bool {
        self.shared.installed.load(Ordering::SeqCst)
    }

    /// Token cancelled once the host has been asked to terminate.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    /// Start listening for SIGINT/SIGTERM. Only the first call spawns the
    /// listener; every call returns the same shutdown token.
    ///
    /// Must be called from within a tokio runtime.
    pub fn install(&self) -> CancellationToken {
        if self.shared.installed.swap(true, Ordering::SeqCst) {
            debug!("Exit hook already installed");
            return self.shutdown_token();
        }

        // Registered before returning so no signal sent after `install` is missed.
        let signals = TerminationSignals::register();
        let shared = Arc::clone(&self.shared);
        let listener = self.listener.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = listener.cancelled() => {}
                signal = signals.recv() => {
                    info!(signal, "Host received termination signal");
                    shared.fire(signal);
                    shared.shutdown.cancel();
                }
            }
        });

        self.shutdown_token()
    }
}

impl Default for ExitHook {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ExitHook {
    fn drop(&mut self) {
        self.listener.cancel();
        self.shared.fire("supervisor dropped");
    }
}

#[cfg(unix)]
struct TerminationSignals(Option<(tokio::signal::unix::Signal, tokio::signal::unix::Signal)>);

#[cfg(unix)]
impl TerminationSignals {
    fn register() -> Self {
        use tokio::signal::unix::{SignalKind as UnixSignal, signal};

        match (
            signal(UnixSignal::interrupt()),
            signal(UnixSignal::terminate()),
        ) {
            (Ok(int), Ok(term)) => Self(Some((int, term))),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Could not install signal handlers; relying on drop only");
                Self(None)
            }
        }
    }

    async fn recv(self) -> &'static str {
        let Some((mut int, mut term)) = self.0 else {
            return std::future::pending().await;
        };
        tokio::select! {
            _ = int.recv() => "SIGINT",
            _ = term.recv() => "SIGTERM",
        }
    }
}

#[cfg(not(unix))]
struct TerminationSignals;

#[cfg(not(unix))]
impl TerminationSignals {
    const fn register() -> Self {
        Self
    }

    async fn recv(self) -> &'static str {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not install Ctrl+C handler; relying on drop only");
            std::future::pending::<()>().await;
        }
        "ctrl-c"
    }
}
