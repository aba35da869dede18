//! Error taxonomy for the orchestration kernel.
//!
//! Storage and resource failures are structured so callers can match on them.
//! Job logic failures stay `anyhow::Error`: they are recorded on the job and
//! never cross the executor boundary.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use super::jobs::JobStatus;

/// Any error raised by a job's `process()` logic.
pub type JobLogicError = anyhow::Error;

/// Persistence or read failure in a job store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("job {0} not found")]
    NotFound(Uuid),

    /// Only `submitted -> processing`, `processing -> completed` and
    /// `processing -> failed` may be requested.
    #[error("illegal status transition {from} -> {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },

    #[error("in-memory store lock poisoned")]
    Poisoned,
}

/// The session pool could not hand out a session.
#[derive(Debug, Error)]
pub enum ResourceUnavailable {
    #[error("failed to create automation session: {0:#}")]
    Creation(#[source] anyhow::Error),

    #[error("no session became available within {0:?}")]
    Timeout(Duration),

    #[error("session pool is shutting down")]
    ShuttingDown,
}

/// Another process already holds the single-instance marker.
#[derive(Debug, Error)]
#[error("instance lock {} is unavailable", .path.display())]
pub struct LockUnavailable {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Failure to take the instance lock. Only `Held` means another instance is
/// running; `Open` is a local problem with the lock file itself.
#[derive(Debug, Error)]
pub enum InstanceLockError {
    #[error(transparent)]
    Held(#[from] LockUnavailable),

    #[error("failed to open instance lock {}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
