//! Job store interface.
//!
//! The store is the single source of truth for job state. Claiming relies on
//! `transition_status` being an atomic compare-and-swap at the storage layer;
//! no in-process locks are needed on top of it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::job::{Job, JobStatus};
use crate::kernel::error::StoreError;

/// How long a job handed out by `next_runnable_job` stays hidden from other
/// callers unless it is claimed first. An abandoned reservation expires.
pub const RESERVATION_TTL: Duration = Duration::from_secs(60);

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job in `submitted` state and return its id.
    async fn insert_job(&self, job: &Job) -> Result<Uuid, StoreError>;

    /// Conditionally move a job from `from` to `to`.
    ///
    /// Returns `Ok(false)` when the current status is not `from` (including a
    /// missing job). That is the normal "already claimed" signal, not an error.
    /// Requests outside the state machine fail with `StoreError::IllegalTransition`.
    async fn transition_status(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<bool, StoreError>;

    /// One job currently in `submitted`, oldest first.
    ///
    /// The returned job is reserved for [`RESERVATION_TTL`], so concurrent
    /// callers get different jobs. Reservation is not ownership: the caller
    /// still claims with `transition_status(submitted -> processing)`.
    async fn next_runnable_job(&self) -> Result<Option<Job>, StoreError>;

    async fn get_job_by_id(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Attach a failure message for operator inspection.
    async fn record_error(&self, id: Uuid, message: &str) -> Result<(), StoreError>;
}

/// Reject anything that is not a forward edge of the state machine.
pub(crate) fn ensure_legal(from: JobStatus, to: JobStatus) -> Result<(), StoreError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::IllegalTransition { from, to })
    }
}

/// A single scheduler fire, kept for bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FireRecord {
    pub definition: String,
    pub job_id: Uuid,
    pub fired_at: DateTime<Utc>,
}

/// Hook invoked after a scheduled definition has produced a job.
#[async_trait]
pub trait FireRecorder: Send + Sync {
    async fn record_fire(&self, record: &FireRecord) -> Result<(), StoreError>;
}
