//! Job executor: status bookkeeping around concrete job logic.
//!
//! ```text
//! execute(job)
//!     │
//!     ├─► transition submitted → processing   (false → Skipped, no side effects)
//!     ├─► registry.build(job) + logic.process(ctx)
//!     │       ├─ Ok(outcome)  → processing → completed
//!     │       └─ Err / panic  → record_error, processing → failed
//!     └─► Execution report
//! ```
//!
//! No retries happen here. A failed job stays failed until someone re-submits it.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::anyhow;
use futures::FutureExt;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::job::{Job, JobStatus};
use super::logic::{JobContext, JobOutcome};
use super::registry::SharedJobRegistry;
use super::store::JobStore;
use crate::config::Config;
use crate::kernel::error::{JobLogicError, StoreError};
use crate::kernel::sessions::SessionPool;

/// What happened to a job handed to the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    /// The claim failed: another runner owns the job or it left `submitted`.
    Skipped,
    Completed(JobOutcome),
    Failed(String),
}

pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    registry: SharedJobRegistry,
    sessions: Arc<SessionPool>,
    config: Arc<Config>,
}

impl JobExecutor {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: SharedJobRegistry,
        sessions: Arc<SessionPool>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            registry,
            sessions,
            config,
        }
    }

    /// Run one job through the claim / process / finish protocol.
    ///
    /// Only store failures are returned as errors; job logic failures become
    /// `Execution::Failed`.
    pub async fn execute(
        &self,
        job: &Job,
        correlation_id: Uuid,
    ) -> Result<Execution, StoreError> {
        let span = info_span!(
            "job",
            job_id = %job.id,
            kind = %job.kind,
            correlation_id = %correlation_id
        );
        self.execute_inner(job, correlation_id).instrument(span).await
    }

    async fn execute_inner(
        &self,
        job: &Job,
        correlation_id: Uuid,
    ) -> Result<Execution, StoreError> {
        let claimed = self
            .store
            .transition_status(job.id, JobStatus::Submitted, JobStatus::Processing)
            .await?;
        if !claimed {
            debug!("job already claimed or not submitted, skipping");
            return Ok(Execution::Skipped);
        }

        debug!("job claimed");

        match self.run_logic(job, correlation_id).await {
            Ok(outcome) => {
                info!(outcome = %outcome, "job completed");
                self.finish(job.id, JobStatus::Completed).await?;
                Ok(Execution::Completed(outcome))
            }
            Err(e) => {
                let message = format!("{e:#}");
                warn!(error = %message, "job failed");

                // The terminal transition matters more than the message
                if let Err(record_err) = self.store.record_error(job.id, &message).await {
                    error!(error = %record_err, "failed to record job error");
                }
                self.finish(job.id, JobStatus::Failed).await?;
                Ok(Execution::Failed(message))
            }
        }
    }

    async fn run_logic(
        &self,
        job: &Job,
        correlation_id: Uuid,
    ) -> Result<JobOutcome, JobLogicError> {
        let logic = self.registry.build(job)?;
        let ctx = JobContext::for_job(
            job,
            correlation_id,
            self.sessions.clone(),
            self.config.clone(),
        );

        match AssertUnwindSafe(logic.process(&ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(anyhow!("job logic panicked: {}", panic_message(panic.as_ref()))),
        }
    }

    async fn finish(&self, id: Uuid, to: JobStatus) -> Result<(), StoreError> {
        let moved = self
            .store
            .transition_status(id, JobStatus::Processing, to)
            .await?;
        if !moved {
            warn!(status = %to, "job left processing while running; terminal status not written");
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
