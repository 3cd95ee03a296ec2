//! Process handle for the supervised server.
//!
//! - `spawn` - create the child in its own process group with piped output
//! - `ManagedProcess` - liveness, group signalling and bounded waits
//! - `shutdown_group` - SIGTERM → grace period → SIGKILL escalation
//! - `KillGuard` - SIGKILLs the group if teardown is interrupted

mod handle;
mod shutdown;
mod signal;

pub use handle::{ManagedProcess, WaitError, spawn};
pub use shutdown::{KillGuard, ShutdownOutcome, shutdown_group};
pub use signal::{SignalKind, signal_group};
