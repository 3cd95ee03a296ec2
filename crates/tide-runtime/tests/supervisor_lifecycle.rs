//! End-to-end supervisor scenarios against real child processes.
//!
//! Each test spawns `/bin/sh` as the "server" and a local axum mock as its
//! readiness endpoint.
#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockModels, POLL_INTERVAL, eventually, fast_schedule, sh_spec, sh_spec_builder};
use tide_core::{LogSinkPort, NoopLogSink, OutputStream, ProcessState, ReadinessError};
use tide_runtime::{MemoryLogSink, ProbeSchedule, Supervisor, spawn_health_monitor};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn supervisor(spec: tide_core::LaunchSpec) -> Supervisor {
    Supervisor::with_schedule(spec, Arc::new(NoopLogSink), fast_schedule()).unwrap()
}

#[tokio::test]
async fn stop_is_idempotent() {
    let mock = MockModels::start(0).await;
    let supervisor = supervisor(sh_spec("sleep 30", mock.port()));

    supervisor.stop().await;
    assert_eq!(supervisor.state(), ProcessState::Idle);

    supervisor.start().await.unwrap();
    supervisor.stop().await;
    supervisor.stop().await;
    assert_eq!(supervisor.state(), ProcessState::Stopped);
    assert!(supervisor.record().await.is_none());
}

#[tokio::test]
async fn ready_after_model_is_listed() {
    // Empty listing for 3 polls, then the model.
    let mock = MockModels::start(3).await;
    let supervisor = supervisor(sh_spec("sleep 30", mock.port()));

    supervisor.start().await.unwrap();
    assert_eq!(supervisor.state(), ProcessState::Starting);

    let elapsed = supervisor.wait_until_ready(None).await.unwrap();
    assert_eq!(mock.polls(), 4);
    assert!(elapsed >= POLL_INTERVAL * 3, "ready too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "ready too late: {elapsed:?}");
    assert_eq!(supervisor.state(), ProcessState::Running);

    assert!(supervisor.health_check().await);
    // Already running: returns at once.
    assert_eq!(
        supervisor.wait_until_ready(None).await.unwrap(),
        Duration::ZERO
    );

    supervisor.stop().await;
    assert_eq!(supervisor.state(), ProcessState::Stopped);
    assert!(!supervisor.health_check().await);
}

#[tokio::test]
async fn death_during_startup_is_reported_promptly() {
    let mock = MockModels::never_ready().await;
    let supervisor = supervisor(sh_spec("sleep 0.25; exit 1", mock.port()));

    supervisor.start().await.unwrap();
    let started = Instant::now();
    let err = supervisor.wait_until_ready(None).await.unwrap_err();

    assert_eq!(
        err,
        ReadinessError::ProcessDiedDuringStartup { code: Some(1) }
    );
    // Well within the 5s startup timeout.
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(supervisor.state(), ProcessState::Failed);
    assert!(supervisor.record().await.is_none());
}

#[tokio::test]
async fn death_while_endpoint_hangs_is_not_a_timeout() {
    let port = common::silent_endpoint().await;
    let schedule = ProbeSchedule {
        request_timeout: Duration::from_secs(5),
        ..fast_schedule()
    };
    let supervisor = Supervisor::with_schedule(
        sh_spec("sleep 0.2; exit 1", port),
        Arc::new(NoopLogSink),
        schedule,
    )
    .unwrap();

    supervisor.start().await.unwrap();
    let started = Instant::now();
    let err = supervisor.wait_until_ready(None).await.unwrap_err();

    assert_eq!(
        err,
        ReadinessError::ProcessDiedDuringStartup { code: Some(1) }
    );
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(supervisor.state(), ProcessState::Failed);
}

#[tokio::test]
async fn hung_endpoint_times_out_at_the_deadline() {
    let port = common::silent_endpoint().await;
    let timeout = Duration::from_secs(1);
    let schedule = ProbeSchedule {
        request_timeout: Duration::from_secs(5),
        ..fast_schedule()
    };
    let spec = sh_spec_builder("sleep 30", port)
        .startup_timeout(timeout)
        .build()
        .unwrap();
    let supervisor = Supervisor::with_schedule(spec, Arc::new(NoopLogSink), schedule).unwrap();

    supervisor.start().await.unwrap();
    let started = Instant::now();
    let err = supervisor.wait_until_ready(None).await.unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(err, ReadinessError::StartupTimeout { timeout });
    assert!(elapsed < timeout + POLL_INTERVAL * 5, "timed out late: {elapsed:?}");
}

#[tokio::test]
async fn startup_timeout_fires_at_the_deadline() {
    let mock = MockModels::never_ready().await;
    let timeout = Duration::from_secs(1);
    let spec = sh_spec_builder("sleep 30", mock.port())
        .startup_timeout(timeout)
        .build()
        .unwrap();
    let supervisor = supervisor(spec);

    supervisor.start().await.unwrap();
    #[cfg(target_os = "linux")]
    let pid = supervisor.record().await.unwrap().pid;
    let started = Instant::now();
    let err = supervisor.wait_until_ready(None).await.unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(err, ReadinessError::StartupTimeout { timeout });
    assert!(elapsed >= timeout, "timed out early: {elapsed:?}");
    assert!(elapsed < timeout + POLL_INTERVAL * 5, "timed out late: {elapsed:?}");
    assert!(mock.polls() >= 5);

    // The child was torn down.
    assert_eq!(supervisor.state(), ProcessState::Failed);
    assert!(supervisor.record().await.is_none());
    #[cfg(target_os = "linux")]
    assert!(common::is_dead(pid));
}

#[tokio::test]
async fn explicit_timeout_overrides_spec() {
    let mock = MockModels::never_ready().await;
    let supervisor = supervisor(sh_spec("sleep 30", mock.port()));

    supervisor.start().await.unwrap();
    let timeout = Duration::from_millis(300);
    let err = supervisor.wait_until_ready(Some(timeout)).await.unwrap_err();
    assert_eq!(err, ReadinessError::StartupTimeout { timeout });
}

#[tokio::test]
async fn stop_escalates_when_term_is_ignored() {
    let mock = MockModels::start(0).await;
    let grace = Duration::from_millis(500);
    let spec = sh_spec_builder("trap '' TERM; while true; do sleep 0.1; done", mock.port())
        .shutdown_timeout(grace)
        .build()
        .unwrap();
    let supervisor = supervisor(spec);

    supervisor.start().await.unwrap();
    supervisor.wait_until_ready(None).await.unwrap();
    #[cfg(target_os = "linux")]
    let pid = supervisor.record().await.unwrap().pid;

    let started = Instant::now();
    supervisor.stop().await;
    let elapsed = started.elapsed();

    assert!(elapsed >= grace, "stopped before the grace period: {elapsed:?}");
    assert!(elapsed < grace + Duration::from_secs(3), "kill took too long: {elapsed:?}");
    assert_eq!(supervisor.state(), ProcessState::Stopped);
    #[cfg(target_os = "linux")]
    assert!(common::is_dead(pid));
}

#[tokio::test]
async fn health_check_does_not_wait_for_a_slow_stop() {
    let mock = MockModels::start(0).await;
    let spec = sh_spec_builder("trap '' TERM; while true; do sleep 0.1; done", mock.port())
        .shutdown_timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let supervisor = Arc::new(supervisor(spec));

    supervisor.start().await.unwrap();
    supervisor.wait_until_ready(None).await.unwrap();

    let stopping = Arc::clone(&supervisor);
    let stop = tokio::spawn(async move { stopping.stop().await });
    let stopping_seen = eventually(Duration::from_secs(1), || {
        supervisor.state() == ProcessState::Stopping
    })
    .await;
    assert!(stopping_seen);

    let started = Instant::now();
    assert!(!supervisor.health_check().await);
    assert!(started.elapsed() < Duration::from_millis(500));

    stop.await.unwrap();
    assert_eq!(supervisor.state(), ProcessState::Stopped);
}

#[tokio::test]
async fn stop_while_starting_cancels_the_wait() {
    let mock = MockModels::never_ready().await;
    let supervisor = Arc::new(supervisor(sh_spec("sleep 30", mock.port())));
    supervisor.start().await.unwrap();

    let waiter = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move { supervisor.wait_until_ready(None).await })
    };
    tokio::time::sleep(POLL_INTERVAL * 3).await;

    supervisor.stop().await;
    let result = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("readiness wait kept running after stop")
        .unwrap();

    assert_eq!(result, Err(ReadinessError::Cancelled));
    assert_eq!(supervisor.state(), ProcessState::Stopped);
}

#[tokio::test]
async fn missing_executable_leaves_supervisor_failed() {
    let mock = MockModels::start(0).await;
    let spec = tide_core::LaunchSpec::builder(
        "definitely-not-a-real-binary-tide",
        "127.0.0.1",
        mock.port(),
        common::TEST_MODEL,
    )
    .build()
    .unwrap();
    let supervisor = supervisor(spec);

    let err = supervisor.start().await.unwrap_err();
    assert!(err.to_string().contains("definitely-not-a-real-binary-tide"));
    assert_eq!(supervisor.state(), ProcessState::Failed);
    assert_eq!(
        supervisor.wait_until_ready(None).await,
        Err(ReadinessError::NotStarting {
            state: ProcessState::Failed
        })
    );
}

#[tokio::test]
async fn second_start_is_a_noop() {
    let mock = MockModels::start(0).await;
    let supervisor = supervisor(sh_spec("sleep 30", mock.port()));

    supervisor.start().await.unwrap();
    let first = supervisor.record().await.unwrap();
    supervisor.start().await.unwrap();
    let second = supervisor.record().await.unwrap();

    assert_eq!(first.pid, second.pid);
    assert_eq!(first.pgid, first.pid);
    supervisor.stop().await;
}

#[tokio::test]
async fn child_output_reaches_the_sink() {
    let mock = MockModels::start(0).await;
    let sink = Arc::new(MemoryLogSink::new());
    let supervisor = Supervisor::with_schedule(
        sh_spec("echo loading weights; echo cuda warning >&2; sleep 30", mock.port()),
        Arc::clone(&sink) as Arc<dyn LogSinkPort>,
        fast_schedule(),
    )
    .unwrap();

    supervisor.start().await.unwrap();
    let seen = eventually(Duration::from_secs(2), || sink.len() >= 2).await;
    assert!(seen, "child output never reached the sink");

    let lines = sink.snapshot();
    assert!(lines.iter().any(|l| l.stream == OutputStream::Stdout
        && l.line == "loading weights"
        && l.source == "mock-vllm"));
    assert!(
        lines
            .iter()
            .any(|l| l.stream == OutputStream::Stderr && l.line == "cuda warning")
    );
    supervisor.stop().await;
}

#[tokio::test]
async fn death_after_ready_degrades_with_exit_code() {
    let mock = MockModels::start(0).await;
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("die");
    let spec = sh_spec_builder(
        "while [ ! -f \"$DIE_MARKER\" ]; do sleep 0.05; done; exit 7",
        mock.port(),
    )
    .env("DIE_MARKER", marker.display().to_string())
    .build()
    .unwrap();
    let supervisor = supervisor(spec);

    supervisor.start().await.unwrap();
    supervisor.wait_until_ready(None).await.unwrap();
    assert!(supervisor.health_check().await);

    std::fs::write(&marker, b"").unwrap();
    let deadline = Instant::now() + Duration::from_secs(3);
    while supervisor.health_check().await {
        assert!(Instant::now() < deadline, "death never detected");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(supervisor.state(), ProcessState::Degraded);
    assert_eq!(supervisor.record().await.unwrap().exit_code, Some(7));
    // Still unhealthy on the next check; no automatic restart.
    assert!(!supervisor.health_check().await);
    assert_eq!(supervisor.state(), ProcessState::Degraded);

    supervisor.stop().await;
    assert_eq!(supervisor.state(), ProcessState::Stopped);
    assert!(supervisor.record().await.is_none());
}

#[tokio::test]
async fn degraded_recovers_when_endpoint_returns() {
    let mock = MockModels::start(0).await;
    let supervisor = supervisor(sh_spec("sleep 30", mock.port()));

    supervisor.start().await.unwrap();
    supervisor.wait_until_ready(None).await.unwrap();

    mock.set_unavailable(true);
    assert!(!supervisor.health_check().await);
    assert_eq!(supervisor.state(), ProcessState::Degraded);

    mock.set_unavailable(false);
    assert!(supervisor.health_check().await);
    assert_eq!(supervisor.state(), ProcessState::Running);

    supervisor.stop().await;
}

#[tokio::test]
async fn health_monitor_notices_death() {
    let mock = MockModels::start(0).await;
    let supervisor = Arc::new(supervisor(sh_spec("sleep 0.3; exit 4", mock.port())));

    supervisor.start().await.unwrap();
    supervisor.wait_until_ready(None).await.unwrap();

    let cancel = CancellationToken::new();
    let monitor = spawn_health_monitor(Arc::clone(&supervisor), POLL_INTERVAL, cancel.clone());
    let degraded = eventually(Duration::from_secs(3), || {
        supervisor.state() == ProcessState::Degraded
    })
    .await;
    assert!(degraded, "monitor never flagged the dead server");
    assert_eq!(supervisor.record().await.unwrap().exit_code, Some(4));

    cancel.cancel();
    monitor.await.unwrap();
    supervisor.stop().await;
}

#[tokio::test]
async fn restart_after_stop() {
    let mock = MockModels::start(0).await;
    let supervisor = supervisor(sh_spec("sleep 30", mock.port()));

    supervisor.start().await.unwrap();
    supervisor.wait_until_ready(None).await.unwrap();
    let first = supervisor.record().await.unwrap().pid;
    supervisor.stop().await;

    supervisor.start().await.unwrap();
    supervisor.wait_until_ready(None).await.unwrap();
    let second = supervisor.record().await.unwrap().pid;
    assert_ne!(first, second);
    assert!(supervisor.health_check().await);

    supervisor.stop().await;
    assert_eq!(supervisor.state(), ProcessState::Stopped);
}

#[tokio::test]
async fn concurrent_stops_serialize() {
    let mock = MockModels::start(0).await;
    let supervisor = Arc::new(supervisor(sh_spec("sleep 30", mock.port())));
    supervisor.start().await.unwrap();

    let a = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.stop().await }
    });
    let b = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.stop().await }
    });
    a.await.unwrap();
    b.await.unwrap();

    assert_eq!(supervisor.state(), ProcessState::Stopped);
}

#[tokio::test]
async fn register_exit_hooks_returns_one_token() {
    let mock = MockModels::start(0).await;
    let supervisor = supervisor(sh_spec("sleep 30", mock.port()));

    let first = supervisor.register_exit_hooks();
    let second = supervisor.register_exit_hooks();
    assert!(!first.is_cancelled());
    assert!(!second.is_cancelled());
}

#[tokio::test]
#[cfg(target_os = "linux")]
async fn dropping_the_supervisor_terminates_the_child() {
    let mock = MockModels::start(0).await;
    let supervisor = supervisor(sh_spec("sleep 30", mock.port()));

    supervisor.start().await.unwrap();
    let pid = supervisor.record().await.unwrap().pid;
    drop(supervisor);

    let gone = eventually(Duration::from_secs(5), || common::is_dead(pid)).await;
    assert!(gone, "child outlived its supervisor");
}
