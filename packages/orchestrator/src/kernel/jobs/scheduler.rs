//! Scheduled job definitions using tokio-cron-scheduler.
//!
//! Each definition is a (kind, parameter templates, cron schedule) triple. On
//! every fire a fresh `submitted` job is inserted with its date tokens resolved
//! against the fire date, so recurring definitions yield different parameters
//! on different days.
//!
//! ```text
//! Scheduler (cron)
//!     │
//!     └─► TriggerHandler.fire(definition, today)
//!             ├─► resolve parameter templates
//!             ├─► JobStore.insert_job (submitted)
//!             └─► FireRecorder.record_fire
//! ```
//!
//! A failed fire is logged and does not affect later fires.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::job::{Job, JobParameters};
use super::params::resolve_all;
use super::registry::SharedJobRegistry;
use super::store::{FireRecord, FireRecorder, JobStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJobDefinition {
    pub name: String,
    pub kind: String,
    /// Values may use `TODAY`, `TODAY+N` or `TODAY-N`.
    #[serde(default)]
    pub parameters: JobParameters,
    /// Six-field cron expression: `sec min hour day-of-month month day-of-week`.
    pub schedule: String,
}

/// Read definitions from a JSON array file.
pub fn load_definitions(path: &Path) -> Result<Vec<ScheduledJobDefinition>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read schedule file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("invalid schedule file {}", path.display()))
}

pub struct TriggerHandler {
    store: Arc<dyn JobStore>,
    recorder: Arc<dyn FireRecorder>,
    registry: SharedJobRegistry,
}

impl TriggerHandler {
    pub fn new(
        store: Arc<dyn JobStore>,
        recorder: Arc<dyn FireRecorder>,
        registry: SharedJobRegistry,
    ) -> Self {
        Self {
            store,
            recorder,
            registry,
        }
    }

    /// Create and persist one job for `definition`, resolving dates against `today`.
    pub async fn fire(
        &self,
        definition: &ScheduledJobDefinition,
        today: NaiveDate,
    ) -> Result<Uuid> {
        let correlation_id = Uuid::new_v4();
        let span = info_span!(
            "schedule_fire",
            definition = %definition.name,
            kind = %definition.kind,
            correlation_id = %correlation_id
        );

        async {
            if !self.registry.is_registered(&definition.kind) {
                bail!(
                    "schedule '{}' refers to unknown job kind '{}'",
                    definition.name,
                    definition.kind
                );
            }

            let parameters = resolve_all(&definition.parameters, today);
            let job = Job::submitted(definition.kind.clone(), parameters);
            let job_id = self
                .store
                .insert_job(&job)
                .await
                .with_context(|| {
                    format!("failed to insert job for schedule '{}'", definition.name)
                })?;

            let record = FireRecord {
                definition: definition.name.clone(),
                job_id,
                fired_at: Utc::now(),
            };
            // The job exists at this point; losing the bookkeeping row is not fatal
            if let Err(e) = self.recorder.record_fire(&record).await {
                warn!(job_id = %job_id, error = %e, "failed to record schedule fire");
            }

            info!(job_id = %job_id, "scheduled job submitted");
            Ok(job_id)
        }
        .instrument(span)
        .await
    }
}

/// Fires are evaluated in local time so the fire instant and the `TODAY` date
/// resolved for it agree.
fn cron_job(definition: ScheduledJobDefinition, handler: Arc<TriggerHandler>) -> Result<CronJob> {
    let schedule = definition.schedule.clone();
    let name = definition.name.clone();
    let definition = Arc::new(definition);

    CronJob::new_async_tz(schedule.as_str(), Local, move |_uuid, _lock| {
        let handler = handler.clone();
        let definition = definition.clone();
        Box::pin(async move {
            let today = Local::now().date_naive();
            if let Err(e) = handler.fire(&definition, today).await {
                error!(
                    definition = %definition.name,
                    error = %format!("{e:#}"),
                    "scheduled fire failed"
                );
            }
        })
    })
    .with_context(|| format!("invalid schedule '{schedule}' for '{name}'"))
}

/// Register every definition and start the scheduler.
pub async fn start_scheduler(
    definitions: Vec<ScheduledJobDefinition>,
    handler: Arc<TriggerHandler>,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    let count = definitions.len();

    for definition in definitions {
        scheduler.add(cron_job(definition, handler.clone())?).await?;
    }

    scheduler.start().await?;
    info!(definitions = count, "scheduler started");
    Ok(scheduler)
}
