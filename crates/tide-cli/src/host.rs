//! Host run loop: bring the backend up, serve health, shut down cleanly.
//!
//! Startup order:
//! 1. Build the backend from [`VllmConfig`] (supervised, external or disabled)
//! 2. For a supervised backend, start `vllm serve` and block until the model
//!    is listed; a startup failure aborts the host
//! 3. Serve `/health` and `/logs` until SIGINT/SIGTERM
//! 4. Stop the backend

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tide_core::{LogSinkPort, VllmConfig};
use tide_runtime::{
    ExitHook, MemoryLogSink, ProbeSchedule, ReadinessProbe, Supervisor, TeeLogSink,
    TracingLogSink, spawn_health_monitor,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::parser::Cli;

/// The inference backend as seen by the host.
#[derive(Debug)]
pub enum Backend {
    /// vLLM is not used.
    Disabled,
    /// A server someone else runs; only probed.
    External(ReadinessProbe),
    /// A `vllm serve` child owned by this host.
    Supervised(Arc<Supervisor>),
}

impl Backend {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::External(_) => "external",
            Self::Supervised(_) => "supervised",
        }
    }
}

/// Shared state of the host's HTTP endpoints.
#[derive(Debug, Clone)]
pub struct AppState {
    backend: Arc<Backend>,
    logs: Arc<MemoryLogSink>,
}

impl AppState {
    pub fn new(backend: Backend, logs: Arc<MemoryLogSink>) -> Self {
        Self {
            backend: Arc::new(backend),
            logs,
        }
    }
}

/// Router with the host's `/health` and `/logs` endpoints.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/logs", get(logs))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Response {
    let (healthy, backend_state) = match state.backend.as_ref() {
        Backend::Disabled => (true, None),
        Backend::External(probe) => (probe.poll().await.is_ready(), None),
        Backend::Supervised(supervisor) => {
            let healthy = supervisor.health_check().await;
            (healthy, Some(supervisor.state()))
        }
    };

    let body = json!({
        "status": if healthy { "ok" } else { "unavailable" },
        "backend": state.backend.kind(),
        "state": backend_state,
    });
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    /// Only return the most recent `limit` lines.
    limit: Option<usize>,
}

async fn logs(State(state): State<AppState>, Query(query): Query<LogsQuery>) -> Response {
    let mut lines = state.logs.snapshot();
    if let Some(limit) = query.limit {
        let skip = lines.len().saturating_sub(limit);
        lines.drain(..skip);
    }
    Json(lines).into_response()
}

/// Run the host until it is asked to terminate.
pub async fn run(cli: Cli) -> Result<()> {
    let config = cli.vllm_config();
    let logs = Arc::new(MemoryLogSink::new());

    // Keeps the signal listener alive when no supervisor owns one.
    let fallback_hook = ExitHook::new();
    let (backend, shutdown) = match prepare_backend(&config, &logs).await? {
        Prepared::Ready(Backend::Supervised(supervisor)) => {
            let shutdown = supervisor.register_exit_hooks();
            (Backend::Supervised(supervisor), shutdown)
        }
        Prepared::Ready(backend) => (backend, fallback_hook.install()),
        Prepared::Interrupted => return Ok(()),
    };

    let monitor_cancel = CancellationToken::new();
    let monitor = match &backend {
        Backend::Supervised(supervisor) => Some(spawn_health_monitor(
            Arc::clone(supervisor),
            Duration::from_secs(cli.health_interval_secs),
            monitor_cancel.clone(),
        )),
        _ => None,
    };

    let state = AppState::new(backend, logs);
    let served = serve(cli.listen, state.clone(), shutdown).await;

    monitor_cancel.cancel();
    if let Some(monitor) = monitor {
        if let Err(e) = monitor.await {
            warn!(error = %e, "Health monitor ended abnormally");
        }
    }
    if let Backend::Supervised(supervisor) = state.backend.as_ref() {
        supervisor.stop().await;
    }

    served
}

enum Prepared {
    Ready(Backend),
    /// A termination signal arrived before the backend was ready.
    Interrupted,
}

async fn prepare_backend(config: &VllmConfig, logs: &Arc<MemoryLogSink>) -> Result<Prepared> {
    if !config.enabled {
        info!("vLLM backend disabled");
        return Ok(Prepared::Ready(Backend::Disabled));
    }

    let spec = config
        .to_launch_spec()
        .context("invalid vLLM configuration")?;

    if !config.auto_start {
        info!(url = %spec.readiness_url(), "Using external vLLM server");
        let probe = ReadinessProbe::new(&spec, ProbeSchedule::default().request_timeout)
            .context("failed to build readiness HTTP client")?;
        return Ok(Prepared::Ready(Backend::External(probe)));
    }

    let sinks: Vec<Arc<dyn LogSinkPort>> = vec![Arc::clone(logs) as _, Arc::new(TracingLogSink)];
    let supervisor = Arc::new(Supervisor::new(spec, Arc::new(TeeLogSink::new(sinks)))?);
    let shutdown = supervisor.register_exit_hooks();

    supervisor
        .start()
        .await
        .context("failed to start vLLM server")?;

    let ready = tokio::select! {
        biased;
        () = shutdown.cancelled() => None,
        ready = supervisor.wait_until_ready(None) => Some(ready),
    };

    match ready {
        None => {
            warn!("Shutdown requested while vLLM was starting");
            supervisor.stop().await;
            Ok(Prepared::Interrupted)
        }
        Some(Ok(elapsed)) => {
            info!(elapsed_secs = elapsed.as_secs(), "vLLM backend ready");
            Ok(Prepared::Ready(Backend::Supervised(supervisor)))
        }
        Some(Err(e)) => {
            supervisor.stop().await;
            Err(e).context("vLLM server did not become ready")
        }
    }
}

async fn serve(addr: SocketAddr, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Health endpoint listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| {
            error!(error = %e, "Host server failed");
            anyhow::Error::from(e)
        })
}
