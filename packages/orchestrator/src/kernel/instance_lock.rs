//! Single-instance guard backed by an advisory file lock.
//!
//! The lock is non-blocking: a second process fails immediately instead of
//! queueing behind the first. The OS releases it when the process exits, even
//! on a crash.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::kernel::error::{InstanceLockError, LockUnavailable};

#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Take the exclusive lock on `path`, creating the file if needed.
    ///
    /// Only contention with another holder is reported as
    /// [`InstanceLockError::Held`].
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, InstanceLockError> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| InstanceLockError::Open {
                path: path.clone(),
                source,
            })?;

        if let Err(source) = file.try_lock_exclusive() {
            let path = path.clone();
            return Err(if is_contended(&source) {
                LockUnavailable { path, source }.into()
            } else {
                InstanceLockError::Open { path, source }
            });
        }

        debug!(path = %path.display(), "instance lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!(path = %self.path.display(), error = %e, "failed to release instance lock");
        }
    }
}
