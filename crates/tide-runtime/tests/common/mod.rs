//! Shared fixtures for supervisor integration tests.
//!
//! Children are `/bin/sh` scripts; the readiness endpoint is a local axum
//! server mimicking vLLM's `/v1/models` listing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tide_core::LaunchSpec;
use tide_runtime::ProbeSchedule;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub const TEST_MODEL: &str = "demo-model";

/// Fast schedule so scenarios run in well under a second per poll.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn fast_schedule() -> ProbeSchedule {
    ProbeSchedule {
        poll_interval: POLL_INTERVAL,
        progress_interval: Duration::from_millis(500),
        request_timeout: Duration::from_secs(1),
    }
}

struct MockState {
    model: String,
    /// Polls answered with an empty listing before the model shows up.
    ready_after: usize,
    polls: AtomicUsize,
    unavailable: AtomicBool,
}

/// Mock `/v1/models` endpoint. Shuts down when dropped.
pub struct MockModels {
    addr: SocketAddr,
    state: Arc<MockState>,
    cancel: CancellationToken,
}

impl MockModels {
    /// Serve an empty listing for `ready_after` polls, then [`TEST_MODEL`].
    pub async fn start(ready_after: usize) -> Self {
        let state = Arc::new(MockState {
            model: TEST_MODEL.to_string(),
            ready_after,
            polls: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        });

        let app = Router::new()
            .route("/v1/models", get(list_models))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            cancel,
        }
    }

    /// A listing that never contains the model.
    pub async fn never_ready() -> Self {
        Self::start(usize::MAX).await
    }

    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn polls(&self) -> usize {
        self.state.polls.load(Ordering::SeqCst)
    }

    /// Answer 503 instead of the listing.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl Drop for MockModels {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn list_models(State(state): State<Arc<MockState>>) -> Response {
    if state.unavailable.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let seen = state.polls.fetch_add(1, Ordering::SeqCst);
    let data = if seen >= state.ready_after {
        json!([{ "id": state.model, "object": "model", "owned_by": "vllm" }])
    } else {
        json!([])
    };
    Json(json!({ "object": "list", "data": data })).into_response()
}

/// Port of an endpoint that accepts connections and never answers.
pub async fn silent_endpoint() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    port
}

/// Launch spec running `script` under `sh -c`, probing `port`.
pub fn sh_spec(script: &str, port: u16) -> LaunchSpec {
    sh_spec_builder(script, port).build().unwrap()
}

pub fn sh_spec_builder(script: &str, port: u16) -> tide_core::LaunchSpecBuilder {
    LaunchSpec::builder("sh", "127.0.0.1", port, TEST_MODEL)
        .name("mock-vllm")
        .args(["-c", script])
        .startup_timeout(Duration::from_secs(5))
        .shutdown_timeout(Duration::from_secs(2))
}

/// Gone, or a zombie waiting to be reaped.
#[cfg(target_os = "linux")]
pub fn is_dead(pid: u32) -> bool {
    std::fs::read_to_string(format!("/proc/{pid}/stat")).map_or(true, |stat| {
        stat.rsplit(')')
            .next()
            .is_some_and(|rest| rest.trim_start().starts_with('Z'))
    })
}

/// Poll `check` every 20ms until it holds or `limit` passes.
pub async fn eventually(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
