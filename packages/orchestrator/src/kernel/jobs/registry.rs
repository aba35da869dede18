//! Job registry mapping job kinds to logic factories.
//!
//! Each domain registers its kinds at startup. When the executor has claimed a
//! job it asks the registry to build the concrete logic from the stored row.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = JobRegistry::new();
//! registry.register(SnapshotPageJob::KIND, |job| {
//!     Ok(Box::new(SnapshotPageJob::from_job(job)?) as Box<dyn JobLogic>)
//! });
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::job::Job;
use super::logic::JobLogic;

type Factory = Box<dyn Fn(&Job) -> Result<Box<dyn JobLogic>> + Send + Sync>;

#[derive(Default)]
pub struct JobRegistry {
    factories: HashMap<String, Factory>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind. A later registration of the same kind replaces the earlier one.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&Job) -> Result<Box<dyn JobLogic>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    /// Build the logic for a job.
    ///
    /// Fails when the kind is not registered or the factory rejects the
    /// job's parameters.
    pub fn build(&self, job: &Job) -> Result<Box<dyn JobLogic>> {
        let factory = self
            .factories
            .get(&job.kind)
            .ok_or_else(|| anyhow!("unknown job kind: {}", job.kind))?;
        factory(job)
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn registered_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

pub type SharedJobRegistry = Arc<JobRegistry>;
