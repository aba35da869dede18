//! Postgres job store tests. Require Docker:
//! `cargo test -p orchestrator --test postgres_store_tests -- --ignored`

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::TestHarness;
use orchestrator_core::kernel::error::StoreError;
use orchestrator_core::kernel::jobs::{
    Dispatcher, FireRecord, FireRecorder, Job, JobParameters, JobStatus, JobStore,
};
use orchestrator_core::kernel::testing::{test_executor, test_registry};
use test_context::test_context;

fn params(pairs: &[(&str, &str)]) -> JobParameters {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn insert_then_get_returns_submitted_job(ctx: &TestHarness) {
    let job = Job::submitted("noop", params(&[("checkin", "2024-03-01")]));
    let id = ctx.store.insert_job(&job).await.unwrap();
    assert_eq!(id, job.id);

    let stored = ctx.store.get_job_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.kind, "noop");
    assert_eq!(stored.status, JobStatus::Submitted);
    assert_eq!(stored.parameter("checkin"), Some("2024-03-01"));
    assert!(stored.started_at.is_none());
    assert!(stored.finished_at.is_none());
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn get_unknown_job_returns_none(ctx: &TestHarness) {
    let missing = ctx.store.get_job_by_id(uuid::Uuid::new_v4()).await.unwrap();
    assert!(missing.is_none());
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn transition_is_conditional(ctx: &TestHarness) {
    let id = ctx
        .store
        .insert_job(&Job::submitted("noop", JobParameters::new()))
        .await
        .unwrap();

    assert!(ctx
        .store
        .transition_status(id, JobStatus::Submitted, JobStatus::Processing)
        .await
        .unwrap());
    // Precondition no longer holds: a no-op, not an error
    assert!(!ctx
        .store
        .transition_status(id, JobStatus::Submitted, JobStatus::Processing)
        .await
        .unwrap());

    let processing = ctx.store.get_job_by_id(id).await.unwrap().unwrap();
    assert_eq!(processing.status, JobStatus::Processing);
    assert!(processing.started_at.is_some());

    assert!(ctx
        .store
        .transition_status(id, JobStatus::Processing, JobStatus::Completed)
        .await
        .unwrap());
    let done = ctx.store.get_job_by_id(id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.finished_at.is_some());
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn illegal_transition_is_rejected(ctx: &TestHarness) {
    let id = ctx
        .store
        .insert_job(&Job::submitted("noop", JobParameters::new()))
        .await
        .unwrap();

    let result = ctx
        .store
        .transition_status(id, JobStatus::Submitted, JobStatus::Completed)
        .await;
    assert!(matches!(result, Err(StoreError::IllegalTransition { .. })));
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn concurrent_claims_have_one_winner(ctx: &TestHarness) {
    let id = ctx
        .store
        .insert_job(&Job::submitted("noop", JobParameters::new()))
        .await
        .unwrap();

    let store = Arc::new(ctx.store.clone());
    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .transition_status(id, JobStatus::Submitted, JobStatus::Processing)
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn next_runnable_is_oldest_submitted(ctx: &TestHarness) {
    assert!(ctx.store.next_runnable_job().await.unwrap().is_none());

    let first = ctx
        .store
        .insert_job(&Job::submitted("noop", JobParameters::new()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = ctx
        .store
        .insert_job(&Job::submitted("noop", JobParameters::new()))
        .await
        .unwrap();

    assert_eq!(ctx.store.next_runnable_job().await.unwrap().unwrap().id, first);

    ctx.store
        .transition_status(first, JobStatus::Submitted, JobStatus::Processing)
        .await
        .unwrap();
    assert_eq!(ctx.store.next_runnable_job().await.unwrap().unwrap().id, second);
}

#[test_context(TestHarness)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires docker"]
async fn concurrent_callers_get_different_runnable_jobs(ctx: &TestHarness) {
    for _ in 0..2 {
        ctx.store
            .insert_job(&Job::submitted("noop", JobParameters::new()))
            .await
            .unwrap();
    }

    let store = Arc::new(ctx.store.clone());
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.next_runnable_job().await.unwrap() })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().expect("each caller gets a job").id);
    }
    assert_ne!(ids[0], ids[1]);

    // Both submitted jobs are reserved until claimed or expired
    assert!(ctx.store.next_runnable_job().await.unwrap().is_none());
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn record_error_keeps_message(ctx: &TestHarness) {
    let id = ctx
        .store
        .insert_job(&Job::submitted("noop", JobParameters::new()))
        .await
        .unwrap();

    ctx.store.record_error(id, "site returned 503").await.unwrap();
    let job = ctx.store.get_job_by_id(id).await.unwrap().unwrap();
    assert_eq!(job.error_message.as_deref(), Some("site returned 503"));

    let missing = ctx.store.record_error(uuid::Uuid::new_v4(), "x").await;
    assert!(matches!(missing, Err(StoreError::NotFound(_))));
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn record_fire_persists_row(ctx: &TestHarness) {
    let id = ctx
        .store
        .insert_job(&Job::submitted("noop", JobParameters::new()))
        .await
        .unwrap();

    ctx.store
        .record_fire(&FireRecord {
            definition: "nightly".to_string(),
            job_id: id,
            fired_at: Utc::now(),
        })
        .await
        .unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schedule_fires WHERE job_id = $1")
        .bind(id)
        .fetch_one(ctx.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn drain_against_postgres(ctx: &TestHarness) {
    for kind in ["noop", "mystery", "noop"] {
        ctx.store
            .insert_job(&Job::submitted(kind, JobParameters::new()))
            .await
            .unwrap();
    }

    let store: Arc<dyn JobStore> = Arc::new(ctx.store.clone());
    let dispatcher = Dispatcher::new(store.clone(), test_executor(store, test_registry()));
    let summary = dispatcher.drain().await.unwrap();

    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 1);
    assert!(ctx.store.next_runnable_job().await.unwrap().is_none());
}
