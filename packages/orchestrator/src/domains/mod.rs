// Business domains
pub mod snapshot;

use crate::kernel::jobs::JobRegistry;

/// Registry with every job kind this crate knows how to run.
pub fn registry() -> JobRegistry {
    let mut registry = JobRegistry::new();
    snapshot::register(&mut registry);
    registry
}
