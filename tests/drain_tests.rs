//! Integration tests for graceful shutdown.


use std::sync::Arc;
use std::time::{Duration, Instant};

use jobhive::engine::{Engine, LifecycleState};
use jobhive::error::EngineError;
use jobhive::scheduler::{CancelReason, JobError, JobState};
use jobhive::worker::{handler_fn, JobContext};
use serde_json::json;
use test_harness::{sleep_payload, start_sleep_engine, test_config, wait_for_running};

/// Ten 2-second jobs, 1-second grace: every job ends terminal and nothing is
/// accepted once shutdown has begun.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_with_long_jobs() {
    let engine = start_sleep_engine(4, 16, Duration::from_secs(1));

    let mut ids = Vec::new();
    for _ in 0..10 {
        ids.push(engine.submit(sleep_payload(2_000), None).await.unwrap().id);
    }
    assert!(wait_for_running(&engine, 4, Duration::from_secs(2)).await);

    let shutdown_engine = Arc::clone(&engine);
    let shutdown = tokio::spawn(async move { shutdown_engine.shutdown().await });

    // Give the controller a moment to flip to draining
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        engine.submit(sleep_payload(1), None).await.unwrap_err(),
        EngineError::ShuttingDown
    );

    let report = shutdown.await.unwrap();
    assert_eq!(report.jobs.total(), 10);
    assert_eq!(report.jobs.terminal(), 10);

    for id in &ids {
        let status = engine.status(id).await.unwrap();
        assert!(
            matches!(status.state, JobState::Completed | JobState::Cancelled),
            "unexpected state {}",
            status.state
        );
    }

    assert_eq!(engine.state().await, LifecycleState::Stopped);
    assert_eq!(
        engine.submit(sleep_payload(1), None).await.unwrap_err(),
        EngineError::ShuttingDown
    );
}

/// Jobs that ignore cancellation are abandoned once the grace period ends.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_abandons_stubborn_jobs() {
    let engine = start_sleep_engine(3, 8, Duration::from_millis(300));

    let mut ids = Vec::new();
    for _ in 0..3 {
        let payload = json!({ "sleep_ms": 10_000, "cooperative": false });
        ids.push(engine.submit(payload, None).await.unwrap().id);
    }
    assert!(wait_for_running(&engine, 3, Duration::from_secs(2)).await);

    let start = Instant::now();
    let report = engine.shutdown().await;
    let elapsed = start.elapsed();

    assert!(
        elapsed < Duration::from_secs(3),
        "shutdown must respect the grace period (took {:?})",
        elapsed
    );
    assert_eq!(report.jobs.cancelled, 3);
    for id in &ids {
        let status = engine.status(id).await.unwrap();
        assert_eq!(status.state, JobState::Cancelled);
        assert_eq!(status.cancel_reason, Some(CancelReason::Shutdown));
        assert!(status.result.is_none());
    }
}

/// Jobs that finish within the grace period keep their result.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_jobs_finishing_within_grace_complete() {
    let engine = start_sleep_engine(2, 8, Duration::from_secs(2));

    let payload = json!({ "sleep_ms": 300, "cooperative": false });
    let id = engine.submit(payload, None).await.unwrap().id;
    assert!(wait_for_running(&engine, 1, Duration::from_secs(2)).await);

    let report = engine.shutdown().await;
    assert_eq!(report.forced_cancelled, 0);
    assert_eq!(report.aborted_workers, 0);

    let status = engine.status(&id).await.unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert!(status.result.is_some());
}

/// Jobs still sitting in the queue at shutdown are cancelled, never run.
#[tokio::test]
async fn test_queued_jobs_are_cancelled() {
    let engine = start_sleep_engine(1, 16, Duration::from_millis(200));

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(engine.submit(sleep_payload(5_000), None).await.unwrap().id);
    }
    assert!(wait_for_running(&engine, 1, Duration::from_secs(2)).await);

    let report = engine.shutdown().await;
    assert_eq!(report.jobs.cancelled, 5);
    assert_eq!(report.discarded_queued, 4);

    for id in &ids[1..] {
        let status = engine.status(id).await.unwrap();
        assert_eq!(status.state, JobState::Cancelled);
        assert_eq!(status.cancel_reason, Some(CancelReason::Shutdown));
        assert!(status.worker_id.is_none(), "queued job must never start");
    }
}

/// Concurrent and repeated shutdown calls all get the same report.
#[tokio::test]
async fn test_shutdown_is_one_shot() {
    let engine = start_sleep_engine(2, 4, Duration::from_millis(200));
    engine.submit(sleep_payload(1_000), None).await.unwrap();

    let a = Arc::clone(&engine);
    let b = Arc::clone(&engine);
    let (first, second) = tokio::join!(a.shutdown(), b.shutdown());
    assert_eq!(first, second);

    let third = engine.shutdown().await;
    assert_eq!(first, third);
    assert_eq!(engine.state().await, LifecycleState::Stopped);
}

/// Dropping the engine without shutdown lets the workers exit.
#[tokio::test]
async fn test_drop_without_shutdown_stops_workers() {
    let handler = handler_fn(|ctx: JobContext| async move {
        ctx.cancelled().await;
        Err::<serde_json::Value, _>(JobError::cancelled())
    });
    let engine = Engine::start(test_config(2, 4, Duration::from_millis(100)), Arc::new(handler))
        .unwrap();
    let id = engine.submit(json!(null), None).await.unwrap().id;
    let token = engine.registry().cancel_token(&id).await.unwrap();

    drop(engine);
    tokio::time::timeout(Duration::from_secs(1), token.cancelled())
        .await
        .expect("job token should be cancelled when the engine is dropped");
}

/// A grace period too large to add to the clock still shuts down cleanly.
#[tokio::test]
async fn test_shutdown_with_unbounded_grace_period() {
    let config = test_config(2, 4, Duration::MAX);
    assert!(config.validate().is_ok());
    let engine = Engine::start(config, Arc::new(jobhive::handlers::SleepHandler)).unwrap();

    let id = engine.submit(sleep_payload(10_000), None).await.unwrap().id;
    assert!(wait_for_running(&engine, 1, Duration::from_secs(2)).await);

    let report = tokio::time::timeout(Duration::from_secs(2), engine.shutdown())
        .await
        .expect("cooperative jobs should let shutdown finish");
    assert_eq!(report.jobs.cancelled, 1);
    assert_eq!(report.aborted_workers, 0);

    let status = engine.status(&id).await.unwrap();
    assert_eq!(status.cancel_reason, Some(CancelReason::Shutdown));
}
