//! Periodic health monitoring of a running supervisor.
//!
//! The monitor is policy-free: it runs [`Supervisor::health_check`] on an
//! interval (which keeps `Running`/`Degraded` current) and logs changes.
//! It never restarts the server.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::supervisor::Supervisor;

/// Spawn a task checking `supervisor` every `every` until `cancel` fires.
pub fn spawn_health_monitor(
    supervisor: Arc<Supervisor>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the caller just confirmed readiness.
        ticker.tick().await;

        let name = supervisor.spec().name().to_string();
        let mut last_healthy = true;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let healthy = supervisor.health_check().await;
            let state = supervisor.state();
            match (last_healthy, healthy) {
                (true, false) => warn!(%state, "{name} is unhealthy"),
                (false, true) => info!(%state, "{name} is healthy again"),
                _ => debug!(healthy, %state, "{name} health check"),
            }
            last_healthy = healthy;
        }

        debug!("{name} health monitor stopped");
    })
}
