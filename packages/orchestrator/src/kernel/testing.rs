//! Test doubles for the orchestration kernel.
//!
//! In-memory sessions and helpers that wire an executor without a browser or
//! database. Used by unit tests and the integration tests under `tests/`.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::config::Config;
use crate::kernel::jobs::{
    JobContext, JobExecutor, JobLogic, JobLogicError, JobOutcome, JobRegistry, JobStore,
};
use crate::kernel::sessions::{PoolConfig, Session, SessionFactory, SessionPool};

/// Session that records navigation in memory.
///
/// URLs starting with `fail://` make `navigate` fail.
pub struct MockSession {
    id: Uuid,
    alive: Arc<AtomicBool>,
    closed: Arc<AtomicUsize>,
    current_url: Option<String>,
    load_delay: Duration,
}

#[async_trait]
impl Session for MockSession {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        if url.starts_with("fail://") {
            return Err(anyhow!("navigation to {} failed", url));
        }
        self.current_url = Some(url.to_string());
        Ok(())
    }

    async fn wait_until_loaded(&mut self) -> Result<()> {
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        Ok(())
    }

    async fn inspect(&self) -> Result<String> {
        let url = self
            .current_url
            .as_deref()
            .ok_or_else(|| anyhow!("nothing loaded"))?;
        Ok(format!("<html><body>{url}</body></html>"))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockSessionFactory {
    created: AtomicUsize,
    closed: Arc<AtomicUsize>,
    fail: AtomicBool,
    load_delay_ms: AtomicU64,
    alive_flags: Mutex<Vec<(Uuid, Arc<AtomicBool>)>>,
}

impl MockSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Make subsequent `create` calls fail.
    pub fn fail_creation(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make sessions created from now on take `delay` to finish loading a page.
    pub fn set_load_delay(&self, delay: Duration) {
        self.load_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Mark a session defunct, as if its client process died.
    pub fn kill(&self, session_id: Uuid) {
        let flags = self.alive_flags.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, alive)) = flags.iter().find(|(id, _)| *id == session_id) {
            alive.store(false, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    async fn create(&self) -> Result<Box<dyn Session>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("browser failed to start"));
        }
        self.created.fetch_add(1, Ordering::SeqCst);

        let id = Uuid::new_v4();
        let alive = Arc::new(AtomicBool::new(true));
        self.alive_flags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, alive.clone()));

        Ok(Box::new(MockSession {
            id,
            alive,
            closed: self.closed.clone(),
            current_url: None,
            load_delay: Duration::from_millis(self.load_delay_ms.load(Ordering::SeqCst)),
        }))
    }
}

/// Job that completes immediately, registered as `noop`.
pub struct NoopJob;

#[async_trait]
impl JobLogic for NoopJob {
    async fn process(&self, _ctx: &JobContext) -> Result<JobOutcome, JobLogicError> {
        Ok(JobOutcome::Done)
    }
}

/// Registry with the `noop` kind.
pub fn test_registry() -> JobRegistry {
    let mut registry = JobRegistry::new();
    registry.register("noop", |_job| Ok(Box::new(NoopJob) as Box<dyn JobLogic>));
    registry
}

pub fn test_pool() -> Arc<SessionPool> {
    Arc::new(SessionPool::new(
        Arc::new(MockSessionFactory::new()),
        PoolConfig::default(),
    ))
}

pub fn test_executor(store: Arc<dyn JobStore>, registry: JobRegistry) -> JobExecutor {
    JobExecutor::new(
        store,
        Arc::new(registry),
        test_pool(),
        Arc::new(Config::default()),
    )
}
