//! Kernel module - orchestration infrastructure shared by every job kind.

pub mod error;
pub mod instance_lock;
pub mod jobs;
pub mod sessions;
pub mod testing;

pub use error::{InstanceLockError, LockUnavailable, ResourceUnavailable, StoreError};
pub use instance_lock::InstanceLock;
