//! Drain loop.
//!
//! Repeatedly asks the store for the next runnable job and runs it through the
//! executor, one at a time, until the store has nothing left. A drain is a
//! finite batch; continuous processing comes from invoking it repeatedly.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use super::executor::{Execution, JobExecutor};
use super::store::JobStore;
use crate::kernel::error::StoreError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DrainSummary {
    pub fn executed(&self) -> usize {
        self.completed + self.failed
    }

    fn record(&mut self, execution: &Execution) {
        match execution {
            Execution::Completed(_) => self.completed += 1,
            Execution::Failed(_) => self.failed += 1,
            Execution::Skipped => self.skipped += 1,
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    executor: JobExecutor,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn JobStore>, executor: JobExecutor) -> Self {
        Self { store, executor }
    }

    /// Run every currently runnable job, then return.
    pub async fn drain(&self) -> Result<DrainSummary, StoreError> {
        self.drain_until(&CancellationToken::new()).await
    }

    /// Like [`drain`](Self::drain), but stops between jobs once `cancel` fires.
    ///
    /// A store error stops the loop instead of spinning on a broken store.
    pub async fn drain_until(
        &self,
        cancel: &CancellationToken,
    ) -> Result<DrainSummary, StoreError> {
        let correlation_id = Uuid::new_v4();
        let span = info_span!("drain", correlation_id = %correlation_id);

        async move {
            let mut summary = DrainSummary::default();

            loop {
                if cancel.is_cancelled() {
                    info!("drain cancelled");
                    break;
                }

                let job = match self.store.next_runnable_job().await {
                    Ok(Some(job)) => job,
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "failed to fetch next runnable job");
                        return Err(e);
                    }
                };

                let execution = self.executor.execute(&job, correlation_id).await.map_err(|e| {
                    error!(job_id = %job.id, error = %e, "store failure while executing job");
                    e
                })?;
                summary.record(&execution);
            }

            info!(
                completed = summary.completed,
                failed = summary.failed,
                skipped = summary.skipped,
                "drain finished"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }
}
