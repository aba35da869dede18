//! In-memory job store.
//!
//! Used for local runs (`DATABASE_URL=memory`) and tests. Every operation runs
//! under one mutex, so the conditional transition is a true compare-and-swap.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::job::{Job, JobStatus};
use super::store::{ensure_legal, FireRecord, FireRecorder, JobStore, RESERVATION_TTL};
use crate::kernel::error::StoreError;

#[derive(Default)]
struct State {
    jobs: HashMap<Uuid, Job>,
    /// Insertion order, used for oldest-first selection.
    order: Vec<Uuid>,
    /// Jobs handed out by `next_runnable_job`, until the deadline.
    reserved: HashMap<Uuid, Instant>,
    fires: Vec<FireRecord>,
}

pub struct InMemoryJobStore {
    state: Mutex<State>,
    reservation_ttl: Duration,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::with_reservation_ttl(RESERVATION_TTL)
    }
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reservation_ttl(reservation_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            reservation_ttl,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    /// All jobs in insertion order.
    pub fn jobs(&self) -> Vec<Job> {
        self.lock()
            .map(|state| {
                state
                    .order
                    .iter()
                    .filter_map(|id| state.jobs.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn jobs_with_status(&self, status: JobStatus) -> Vec<Job> {
        self.jobs()
            .into_iter()
            .filter(|job| job.status == status)
            .collect()
    }

    pub fn fires(&self) -> Vec<FireRecord> {
        self.lock()
            .map(|state| state.fires.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert_job(&self, job: &Job) -> Result<Uuid, StoreError> {
        let mut state = self.lock()?;

        let mut job = job.clone();
        if state.jobs.contains_key(&job.id) {
            job.id = Uuid::new_v4();
        }
        let now = Utc::now();
        job.status = JobStatus::Submitted;
        job.created_at = now;
        job.updated_at = now;

        let id = job.id;
        state.order.push(id);
        state.jobs.insert(id, job);
        Ok(id)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<bool, StoreError> {
        ensure_legal(from, to)?;

        let mut state = self.lock()?;
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(false);
        };
        if job.status != from {
            return Ok(false);
        }

        let now = Utc::now();
        job.status = to;
        job.updated_at = now;
        if to == JobStatus::Processing {
            job.started_at = Some(now);
        }
        if to.is_terminal() {
            job.finished_at = Some(now);
        }
        state.reserved.remove(&id);
        Ok(true)
    }

    async fn next_runnable_job(&self) -> Result<Option<Job>, StoreError> {
        let mut state = self.lock()?;
        let now = Instant::now();
        state.reserved.retain(|_, until| *until > now);

        let job = state
            .order
            .iter()
            .filter_map(|id| state.jobs.get(id))
            .find(|job| {
                job.status == JobStatus::Submitted && !state.reserved.contains_key(&job.id)
            })
            .cloned();

        if let Some(job) = &job {
            state.reserved.insert(job.id, now + self.reservation_ttl);
        }
        Ok(job)
    }

    async fn get_job_by_id(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.lock()?.jobs.get(&id).cloned())
    }

    async fn record_error(&self, id: Uuid, message: &str) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let job = state.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.error_message = Some(message.to_string());
        job.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl FireRecorder for InMemoryJobStore {
    async fn record_fire(&self, record: &FireRecord) -> Result<(), StoreError> {
        self.lock()?.fires.push(record.clone());
        Ok(())
    }
}
