//! Supervisor lifecycle state and the record of the live child process.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a supervised server.
///
/// ```text
/// Idle --start--> Starting --ready--> Running <--health--> Degraded
///                    |                   |                    |
///                    +--fail--> Failed   +------stop----------+--> Stopping --> Stopped
/// ```
///
/// `Failed` and `Stopped` accept a fresh start, exactly like `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    #[default]
    Idle,
    Starting,
    Running,
    /// Running but the last health check failed. Advisory only.
    Degraded,
    Stopping,
    Stopped,
    /// Startup failed; no process is running.
    Failed,
}

impl ProcessState {
    /// Whether `start()` may spawn a new process from this state.
    pub const fn accepts_start(self) -> bool {
        matches!(self, Self::Idle | Self::Stopped | Self::Failed)
    }

    /// Whether a child process is (supposed to be) alive in this state.
    pub const fn has_process(self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Running | Self::Degraded | Self::Stopping
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Degraded => "degraded",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OS-level facts about the live child.
///
/// Created at a successful spawn and dropped once termination is confirmed.
/// Callers only ever see clones of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: u32,
    /// Process group the child leads; signals are delivered to this group.
    pub pgid: u32,
    pub started_at: DateTime<Utc>,
    /// Last observed exit code. `None` while running or when killed by a signal.
    pub exit_code: Option<i32>,
}

impl ProcessRecord {
    pub fn new(pid: u32, pgid: u32) -> Self {
        Self {
            pid,
            pgid,
            started_at: Utc::now(),
            exit_code: None,
        }
    }
}
