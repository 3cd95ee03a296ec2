//! HTTP readiness checks against the server's model listing.
//!
//! A server is ready only when its listing endpoint answers 200 *and*
//! advertises the configured model id. Reachability alone is not enough:
//! vLLM binds its port well before the weights are loaded.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tide_core::{LaunchSpec, ReadinessError};
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timing of the readiness loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSchedule {
    /// Pause between two polls.
    pub poll_interval: Duration,
    /// How often a progress line is logged while waiting.
    pub progress_interval: Duration,
    /// Timeout for each individual HTTP request.
    pub request_timeout: Duration,
}

impl Default for ProbeSchedule {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            progress_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Result of a single poll. Only [`PollOutcome::Ready`] ends the wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// 200 and the readiness id is listed.
    Ready,
    /// 200 but the id is not (yet) listed.
    Loading { advertised: Vec<String> },
    /// Any non-200 status.
    HttpStatus(u16),
    /// Connection, timeout or body errors.
    Unreachable(String),
}

impl PollOutcome {
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// State of the child as seen by the readiness loop before each poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// The process exited with this code (`None` when killed by a signal).
    Exited(Option<i32>),
    /// The supervisor no longer owns a process (it was stopped).
    Released,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    #[serde(default)]
    id: String,
}

/// Queries `<scheme>://host:port<path>` for the configured model id.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    client: Client,
    url: String,
    readiness_id: String,
    api_key: Option<String>,
    name: String,
}

impl ReadinessProbe {
    pub fn new(spec: &LaunchSpec, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            url: spec.readiness_url(),
            readiness_id: spec.readiness_id().to_string(),
            api_key: spec.api_key().map(str::to_string),
            name: spec.name().to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue one readiness request. Never fails; errors become outcomes.
    pub async fn poll(&self) -> PollOutcome {
        let mut request = self.client.get(&self.url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return PollOutcome::Unreachable(e.to_string()),
        };

        let status = response.status();
        if status != StatusCode::OK {
            return PollOutcome::HttpStatus(status.as_u16());
        }

        match response.bytes().await {
            Ok(body) => evaluate(&body, &self.readiness_id),
            Err(e) => PollOutcome::Unreachable(format!("failed to read response body: {e}")),
        }
    }

    /// Poll until the model is listed, the process dies, `timeout` passes
    /// or `cancel` fires.
    ///
    /// `liveness` runs before every poll, every `poll_interval` while a poll
    /// is in flight and once more at the deadline, so a crash is reported as
    /// [`ReadinessError::ProcessDiedDuringStartup`] instead of a timeout.
    /// A poll still in flight at the deadline is abandoned.
    /// Returns the elapsed time on success.
    pub async fn wait_until_ready<F, Fut>(
        &self,
        timeout: Duration,
        schedule: &ProbeSchedule,
        cancel: &CancellationToken,
        mut liveness: F,
    ) -> Result<Duration, ReadinessError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Liveness>,
    {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut next_progress = started + schedule.progress_interval;
        let mut polls: u32 = 0;

        info!(
            url = %self.url,
            model = %self.readiness_id,
            timeout_secs = timeout.as_secs(),
            "Waiting for {} to be ready",
            self.name
        );

        loop {
            if cancel.is_cancelled() {
                return Err(ReadinessError::Cancelled);
            }
            self.check(liveness().await)?;

            let polled = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ReadinessError::Cancelled),
                err = self.watch(&mut liveness, schedule.poll_interval) => return Err(err),
                () = sleep_until(deadline) => None,
                outcome = self.poll() => Some(outcome),
            };
            let Some(outcome) = polled else {
                let state = liveness().await;
                return self.timed_out(timeout, polls, state);
            };
            polls += 1;

            match outcome {
                PollOutcome::Ready => {
                    let elapsed = started.elapsed();
                    info!(
                        polls,
                        elapsed_secs = elapsed.as_secs_f64(),
                        "{} is ready with model {}",
                        self.name,
                        self.readiness_id
                    );
                    return Ok(elapsed);
                }
                PollOutcome::Loading { advertised } => {
                    debug!(poll = polls, ?advertised, "Model not listed yet");
                }
                PollOutcome::HttpStatus(code) => {
                    debug!(poll = polls, status = code, "Readiness endpoint not ready");
                }
                PollOutcome::Unreachable(reason) => {
                    debug!(poll = polls, %reason, "Readiness endpoint unreachable");
                }
            }

            let now = Instant::now();
            if now >= next_progress {
                let elapsed = now - started;
                info!(
                    elapsed_secs = elapsed.as_secs(),
                    remaining_secs = deadline.saturating_duration_since(now).as_secs(),
                    "Still waiting for {} to load {}",
                    self.name,
                    self.readiness_id
                );
                next_progress = now + schedule.progress_interval;
            }

            if now >= deadline {
                let state = liveness().await;
                return self.timed_out(timeout, polls, state);
            }

            let pause = schedule.poll_interval.min(deadline - now);
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ReadinessError::Cancelled),
                () = sleep(pause) => {}
            }
        }
    }

    /// Map a non-alive process to the error ending the wait.
    fn check(&self, state: Liveness) -> Result<(), ReadinessError> {
        match state {
            Liveness::Alive => Ok(()),
            Liveness::Exited(code) => {
                warn!(?code, "{} process died during startup", self.name);
                Err(ReadinessError::ProcessDiedDuringStartup { code })
            }
            Liveness::Released => Err(ReadinessError::Cancelled),
        }
    }

    /// Re-check liveness every `every` until the process is gone.
    async fn watch<F, Fut>(&self, liveness: &mut F, every: Duration) -> ReadinessError
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Liveness>,
    {
        loop {
            sleep(every).await;
            if let Err(e) = self.check(liveness().await) {
                return e;
            }
        }
    }

    /// A dead process wins over the deadline.
    fn timed_out(
        &self,
        timeout: Duration,
        polls: u32,
        state: Liveness,
    ) -> Result<Duration, ReadinessError> {
        self.check(state)?;
        warn!(
            polls,
            timeout_secs = timeout.as_secs(),
            "{} did not become ready in time",
            self.name
        );
        Err(ReadinessError::StartupTimeout { timeout })
    }
}

/// Classify a 200 response body.
fn evaluate(body: &[u8], readiness_id: &str) -> PollOutcome {
    match serde_json::from_slice::<ModelList>(body) {
        Ok(list) => {
            let advertised: Vec<String> = list.data.into_iter().map(|m| m.id).collect();
            if advertised.iter().any(|id| id == readiness_id) {
                PollOutcome::Ready
            } else {
                PollOutcome::Loading { advertised }
            }
        }
        Err(e) => PollOutcome::Unreachable(format!("invalid model listing: {e}")),
    }
}
