//! Job orchestration: store, executor, drain loop and scheduler.
//!
//! # Architecture
//!
//! ```text
//! Scheduler (cron) ──► TriggerHandler.fire()
//!                          └─► JobStore.insert_job (submitted)
//!
//! Dispatcher.drain()
//!     │
//!     ├─► JobStore.next_runnable_job()
//!     └─► JobExecutor.execute(job)
//!             ├─► claim: submitted -> processing (conditional)
//!             ├─► JobRegistry.build(job) -> Box<dyn JobLogic>
//!             ├─► JobLogic.process(ctx)
//!             └─► processing -> completed | failed
//! ```
//!
//! Concrete job logic lives in `domains`. This module only provides the
//! machinery that runs it.

mod dispatcher;
mod executor;
mod job;
mod logic;
mod memory_store;
pub mod params;
mod postgres_store;
mod registry;
mod scheduler;
mod store;

pub use crate::kernel::error::JobLogicError;
pub use dispatcher::{Dispatcher, DrainSummary};
pub use executor::{Execution, JobExecutor};
pub use job::{Job, JobParameters, JobStatus};
pub use logic::{JobContext, JobLogic, JobOutcome};
pub use memory_store::InMemoryJobStore;
pub use params::{resolve, resolve_all};
pub use postgres_store::PostgresJobStore;
pub use registry::{JobRegistry, SharedJobRegistry};
pub use scheduler::{
    load_definitions, start_scheduler, ScheduledJobDefinition, TriggerHandler,
};
pub use store::{FireRecord, FireRecorder, JobStore, RESERVATION_TTL};
