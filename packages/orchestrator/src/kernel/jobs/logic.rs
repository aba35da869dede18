//! Contract for concrete job logic.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::job::{Job, JobParameters};
use crate::config::Config;
use crate::kernel::error::JobLogicError;
use crate::kernel::sessions::SessionPool;

/// Business result of a job that ran to completion.
///
/// "Payment pending" and "not authorized" are expected outcomes of booking-site
/// work, not faults; they still end the job as `completed`. Raised errors are
/// reserved for unexpected failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Done,
    PaymentPending { reference: String },
    NotAuthorized { reason: String },
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Done => f.write_str("done"),
            JobOutcome::PaymentPending { reference } => write!(f, "payment pending ({reference})"),
            JobOutcome::NotAuthorized { reason } => write!(f, "not authorized ({reason})"),
        }
    }
}

/// Everything a job may use while running. Passed explicitly; nothing is
/// looked up through globals or thread locals.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    pub kind: String,
    pub parameters: JobParameters,
    pub correlation_id: Uuid,
    pub sessions: Arc<SessionPool>,
    pub config: Arc<Config>,
}

impl JobContext {
    pub fn for_job(
        job: &Job,
        correlation_id: Uuid,
        sessions: Arc<SessionPool>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            job_id: job.id,
            kind: job.kind.clone(),
            parameters: job.parameters.clone(),
            correlation_id,
            sessions,
            config,
        }
    }

    /// A required parameter, or an error naming the job.
    pub fn require(&self, key: &str) -> Result<&str, JobLogicError> {
        self.parameters
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "job {} ({}) is missing parameter '{}'",
                    self.job_id,
                    self.kind,
                    key
                )
            })
    }
}

#[async_trait]
pub trait JobLogic: Send + Sync {
    async fn process(&self, ctx: &JobContext) -> Result<JobOutcome, JobLogicError>;
}
