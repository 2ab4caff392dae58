//! Integration tests for job execution: fault isolation, handler errors and
//! deadlines, driven through a running engine.


use std::sync::Arc;
use std::time::Duration;

use jobhive::engine::Engine;
use jobhive::scheduler::{CancelReason, FailureKind, JobError, JobOutcome, JobState};
use jobhive::worker::{handler_fn, JobContext};
use serde_json::json;
use test_harness::{sleep_payload, start_sleep_engine, test_config, wait_for_terminal};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panicking_job_does_not_affect_others() {
    let engine = start_sleep_engine(2, 16, Duration::from_millis(500));

    let bad = engine
        .submit(json!({ "sleep_ms": 10, "panic": true }), None)
        .await
        .unwrap()
        .id;
    let mut good = Vec::new();
    for _ in 0..9 {
        good.push(engine.submit(sleep_payload(10), None).await.unwrap().id);
    }

    let mut all = vec![bad];
    all.extend_from_slice(&good);
    let statuses = wait_for_terminal(&engine, &all, Duration::from_secs(5))
        .await
        .expect("all jobs should finish");

    assert_eq!(statuses[0].state, JobState::Failed);
    let error = statuses[0].error.clone().unwrap();
    assert_eq!(error.kind, FailureKind::Panic);
    assert!(error.message.contains("asked to panic"));

    for status in &statuses[1..] {
        assert_eq!(status.state, JobState::Completed);
    }

    // The pool is still at full strength after the panic
    let more = engine.submit(sleep_payload(10), None).await.unwrap().id;
    assert!(wait_for_terminal(&engine, &[more], Duration::from_secs(2))
        .await
        .is_some());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_handler_error_marks_job_failed() {
    let engine = start_sleep_engine(1, 4, Duration::from_millis(200));

    let id = engine
        .submit(json!({ "sleep_ms": 1, "fail": "disk on fire" }), None)
        .await
        .unwrap()
        .id;
    wait_for_terminal(&engine, &[id], Duration::from_secs(2))
        .await
        .unwrap();

    match engine.result(&id).await.unwrap() {
        JobOutcome::Failed(error) => {
            assert_eq!(error.kind, FailureKind::Handler);
            assert_eq!(error.message, "disk on fire");
        }
        other => panic!("expected failure, got {:?}", other),
    }

    engine.shutdown().await;
}

#[tokio::test]
async fn test_malformed_payload_fails() {
    let engine = start_sleep_engine(1, 4, Duration::from_millis(200));

    let id = engine
        .submit(json!({ "sleep_ms": "later" }), None)
        .await
        .unwrap()
        .id;
    let statuses = wait_for_terminal(&engine, &[id], Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(statuses[0].state, JobState::Failed);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_deadline_cancels_job() {
    let engine = start_sleep_engine(1, 4, Duration::from_millis(500));

    let id = engine
        .submit(sleep_payload(10_000), Some(Duration::from_millis(50)))
        .await
        .unwrap()
        .id;
    let statuses = wait_for_terminal(&engine, &[id], Duration::from_secs(2))
        .await
        .expect("deadline should end the job");

    assert_eq!(statuses[0].state, JobState::Cancelled);
    assert_eq!(statuses[0].cancel_reason, Some(CancelReason::Deadline));
    assert_eq!(
        engine.result(&id).await.unwrap(),
        JobOutcome::Cancelled(Some(CancelReason::Deadline))
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn test_deadline_abandons_stubborn_job() {
    let engine = start_sleep_engine(1, 4, Duration::from_millis(100));

    let stubborn = json!({ "sleep_ms": 10_000, "cooperative": false });
    let id = engine
        .submit(stubborn, Some(Duration::from_millis(50)))
        .await
        .unwrap()
        .id;
    let statuses = wait_for_terminal(&engine, &[id], Duration::from_secs(2))
        .await
        .expect("job should be abandoned after the grace period");
    assert_eq!(statuses[0].state, JobState::Cancelled);
    assert_eq!(statuses[0].cancel_reason, Some(CancelReason::Deadline));

    // The worker is free again
    let next = engine.submit(sleep_payload(1), None).await.unwrap().id;
    let statuses = wait_for_terminal(&engine, &[next], Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(statuses[0].state, JobState::Completed);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_default_deadline_applies() {
    let config = test_config(1, 4, Duration::from_millis(200))
        .with_default_deadline(Duration::from_millis(50));
    let engine = Engine::start(config, Arc::new(jobhive::handlers::SleepHandler)).unwrap();

    let handle = engine.submit(sleep_payload(10_000), None).await.unwrap();
    assert_eq!(handle.deadline, Some(Duration::from_millis(50)));

    // An explicit deadline wins over the default
    let explicit = engine
        .submit(sleep_payload(1), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(explicit.deadline, Some(Duration::from_secs(5)));

    let statuses = wait_for_terminal(&engine, &[handle.id, explicit.id], Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(statuses[0].cancel_reason, Some(CancelReason::Deadline));
    assert_eq!(statuses[1].state, JobState::Completed);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_closure_handler_sees_payload_and_worker() {
    let handler = handler_fn(|ctx: JobContext| async move {
        let n = ctx
            .payload
            .as_u64()
            .ok_or_else(|| JobError::handler("expected a number"))?;
        Ok::<_, JobError>(json!({ "double": n * 2, "worker": ctx.worker_id }))
    });
    let engine = Engine::start(test_config(1, 4, Duration::from_millis(100)), Arc::new(handler))
        .unwrap();

    let ok = engine.submit(json!(21), None).await.unwrap().id;
    let bad = engine.submit(json!("x"), None).await.unwrap().id;
    wait_for_terminal(&engine, &[ok, bad], Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(
        engine.result(&ok).await.unwrap(),
        JobOutcome::Completed(json!({ "double": 42, "worker": 0 }))
    );
    assert!(matches!(
        engine.result(&bad).await.unwrap(),
        JobOutcome::Failed(_)
    ));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_deadline_counts_from_start_not_submission() {
    let engine = start_sleep_engine(1, 4, Duration::from_millis(200));

    let blocker = engine.submit(sleep_payload(300), None).await.unwrap().id;
    // Waits in the queue longer than its deadline, then runs well within it
    let queued = engine
        .submit(sleep_payload(10), Some(Duration::from_millis(100)))
        .await
        .unwrap()
        .id;

    let statuses = wait_for_terminal(&engine, &[blocker, queued], Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(statuses[0].state, JobState::Completed);
    assert_eq!(statuses[1].state, JobState::Completed);
    assert!(statuses[1].cancel_reason.is_none());

    engine.shutdown().await;
}
