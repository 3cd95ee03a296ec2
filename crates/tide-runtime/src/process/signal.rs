//! Process-group signal delivery.

use std::io;

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{Signal, killpg};
#[cfg(unix)]
use nix::unistd::Pid;
use tracing::debug;

/// Signals the supervisor ever sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Graceful shutdown request (`SIGTERM`).
    Terminate,
    /// Forced termination (`SIGKILL`); cannot be caught or ignored.
    Kill,
}

#[cfg(unix)]
impl From<SignalKind> for Signal {
    fn from(kind: SignalKind) -> Self {
        match kind {
            SignalKind::Terminate => Self::SIGTERM,
            SignalKind::Kill => Self::SIGKILL,
        }
    }
}

/// Deliver `kind` to every process in group `pgid`.
///
/// A group that no longer exists (`ESRCH`) counts as delivered.
#[cfg(unix)]
pub fn signal_group(pgid: u32, kind: SignalKind) -> io::Result<()> {
    let Ok(raw) = i32::try_from(pgid) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("process group id {pgid} out of range"),
        ));
    };
    // pgid 0 / 1 would hit our own group or init.
    if raw <= 1 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal process group {pgid}"),
        ));
    }

    match killpg(Pid::from_raw(raw), Signal::from(kind)) {
        Ok(()) => {
            debug!(pgid, signal = ?kind, "Signalled process group");
            Ok(())
        }
        Err(Errno::ESRCH) => {
            debug!(pgid, signal = ?kind, "Process group already gone");
            Ok(())
        }
        Err(e) => Err(io::Error::other(e)),
    }
}

/// Process groups are a POSIX concept; callers fall back to the child handle.
#[cfg(not(unix))]
pub fn signal_group(pgid: u32, kind: SignalKind) -> io::Result<()> {
    let _ = (pgid, kind);
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process group signalling is not available on this platform",
    ))
}
