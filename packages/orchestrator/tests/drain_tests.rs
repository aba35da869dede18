//! End-to-end: scheduled fire -> drain -> snapshot on disk, in memory.

use std::sync::Arc;

use chrono::NaiveDate;
use orchestrator_core::config::Config;
use orchestrator_core::domains;
use orchestrator_core::domains::snapshot::SnapshotPageJob;
use orchestrator_core::kernel::jobs::{
    Dispatcher, InMemoryJobStore, JobExecutor, JobParameters, JobStatus, JobStore,
    ScheduledJobDefinition, SharedJobRegistry, TriggerHandler,
};
use orchestrator_core::kernel::sessions::{PoolConfig, SessionPool};
use orchestrator_core::kernel::testing::MockSessionFactory;

struct Fixture {
    store: Arc<InMemoryJobStore>,
    factory: Arc<MockSessionFactory>,
    sessions: Arc<SessionPool>,
    trigger: TriggerHandler,
    dispatcher: Dispatcher,
    _dir: tempfile::TempDir,
    config: Arc<Config>,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(Config {
        snapshot_dir: dir.path().join("snapshots"),
        ..Config::default()
    });

    let store = Arc::new(InMemoryJobStore::new());
    let factory = Arc::new(MockSessionFactory::new());
    let sessions = Arc::new(SessionPool::new(
        factory.clone(),
        PoolConfig {
            max_size: 1,
            ..PoolConfig::default()
        },
    ));
    let registry: SharedJobRegistry = Arc::new(domains::registry());

    let executor = JobExecutor::new(
        store.clone(),
        registry.clone(),
        sessions.clone(),
        config.clone(),
    );
    Fixture {
        trigger: TriggerHandler::new(store.clone(), store.clone(), registry),
        dispatcher: Dispatcher::new(store.clone(), executor),
        store,
        factory,
        sessions,
        _dir: dir,
        config,
    }
}

fn definition(name: &str, url: &str) -> ScheduledJobDefinition {
    let mut parameters = JobParameters::new();
    parameters.insert("url".to_string(), url.to_string());
    parameters.insert("checkin".to_string(), "TODAY+1".to_string());
    parameters.insert("checkout".to_string(), "TODAY+3".to_string());
    parameters.insert("label".to_string(), name.to_string());

    ScheduledJobDefinition {
        name: name.to_string(),
        kind: SnapshotPageJob::KIND.to_string(),
        parameters,
        schedule: "0 0 6 * * *".to_string(),
    }
}

fn fire_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 2, 28).unwrap()
}

#[tokio::test]
async fn scheduled_snapshot_runs_to_completion() {
    let f = fixture();
    let def = definition("beds", "https://hostel.test/?in={checkin}&out={checkout}");
    let id = f.trigger.fire(&def, fire_date()).await.unwrap();

    let summary = f.dispatcher.drain().await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 0);

    let job = f.store.get_job_by_id(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.error_message.is_none());

    let snapshot = f.config.snapshot_dir.join(format!("beds-{id}.html"));
    let html = std::fs::read_to_string(snapshot).unwrap();
    // 2024 is a leap year
    assert!(html.contains("in=2024-02-29&out=2024-03-02"));

    assert_eq!(f.sessions.stats().idle, 1);
    assert_eq!(f.store.fires().len(), 1);
}

#[tokio::test]
async fn failing_job_does_not_stop_the_drain() {
    let f = fixture();
    let broken = f
        .trigger
        .fire(&definition("broken", "fail://hostel.test"), fire_date())
        .await
        .unwrap();
    let healthy = f
        .trigger
        .fire(&definition("healthy", "https://hostel.test/?in={checkin}"), fire_date())
        .await
        .unwrap();

    let summary = f.dispatcher.drain().await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);

    let failed = f.store.get_job_by_id(broken).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("fail://hostel.test"));

    let done = f.store.get_job_by_id(healthy).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);

    // The broken session was discarded and replaced, within a pool of one
    assert_eq!(f.factory.closed(), 1);
    assert_eq!(f.factory.created(), 2);
}

#[tokio::test]
async fn second_drain_finds_nothing() {
    let f = fixture();
    f.trigger
        .fire(&definition("beds", "https://hostel.test/"), fire_date())
        .await
        .unwrap();

    assert_eq!(f.dispatcher.drain().await.unwrap().executed(), 1);
    assert_eq!(f.dispatcher.drain().await.unwrap().executed(), 0);
}

#[tokio::test]
async fn drain_after_pool_shutdown_fails_jobs() {
    let f = fixture();
    let id = f
        .trigger
        .fire(&definition("beds", "https://hostel.test/"), fire_date())
        .await
        .unwrap();

    f.sessions.shutdown();
    let summary = f.dispatcher.drain().await.unwrap();
    assert_eq!(summary.failed, 1);

    let job = f.store.get_job_by_id(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.is_some());
}
