//! Snapshot domain - capture a booking page's rendered DOM to disk.
//!
//! The simplest job that exercises the whole stack: it borrows a session,
//! loads a page whose URL is built from resolved parameters, and stores what
//! the browser rendered.

mod snapshot_page;

pub use snapshot_page::{fill_placeholders, SnapshotPageJob};

use crate::kernel::jobs::{JobLogic, JobRegistry};

pub fn register(registry: &mut JobRegistry) {
    registry.register(SnapshotPageJob::KIND, |job| {
        Ok(Box::new(SnapshotPageJob::from_job(job)?) as Box<dyn JobLogic>)
    });
}
