//! Bounded pool of automation sessions.
//!
//! A semaphore with `max_size` permits bounds the number of leases. New
//! sessions are only created when no idle session is available, so the number
//! of live sessions never exceeds `max_size` either.
//!
//! ```text
//! acquire()
//!     ├─► wait for a permit (timeout / shutdown aware)
//!     ├─► pop idle session, validate with is_alive()
//!     │       └─ defunct → close, try next
//!     └─► none left → factory.create()
//!
//! drop(lease) / release(lease)  → back to idle (or closed after shutdown)
//! invalidate(lease)             → closed, removed from accounting
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Session, SessionFactory};
use crate::kernel::error::ResourceUnavailable;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: usize,
    /// Upper bound on how long `acquire()` waits for a free slot.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 2,
            acquire_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub live: usize,
    pub max_size: usize,
}

struct PoolShared {
    factory: Arc<dyn SessionFactory>,
    idle: Mutex<Vec<Box<dyn Session>>>,
    semaphore: Arc<Semaphore>,
    live: AtomicUsize,
    shutdown: CancellationToken,
}

impl PoolShared {
    fn pop_idle(&self) -> Option<Box<dyn Session>> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).pop()
    }

    fn destroy(&self, mut session: Box<dyn Session>) {
        debug!(session_id = %session.id(), "closing session");
        session.close();
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    /// Shutdown is checked under the idle lock so a late return cannot slip
    /// past the final drain.
    fn return_session(&self, session: Box<dyn Session>) {
        let rejected = {
            let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
            if self.shutdown.is_cancelled() {
                Some(session)
            } else {
                idle.push(session);
                None
            }
        };
        if let Some(session) = rejected {
            self.destroy(session);
        }
    }
}

pub struct SessionPool {
    shared: Arc<PoolShared>,
    config: PoolConfig,
}

impl SessionPool {
    /// A `max_size` of zero is raised to one.
    pub fn new(factory: Arc<dyn SessionFactory>, mut config: PoolConfig) -> Self {
        config.max_size = config.max_size.max(1);
        Self {
            shared: Arc::new(PoolShared {
                factory,
                idle: Mutex::new(Vec::new()),
                semaphore: Arc::new(Semaphore::new(config.max_size)),
                live: AtomicUsize::new(0),
                shutdown: CancellationToken::new(),
            }),
            config,
        }
    }

    /// Lease a session: reuse an idle one, create one if a slot is free, or
    /// wait up to `acquire_timeout` for a lease to come back.
    pub async fn acquire(&self) -> Result<SessionLease, ResourceUnavailable> {
        let shared = &self.shared;
        if shared.shutdown.is_cancelled() {
            return Err(ResourceUnavailable::ShuttingDown);
        }

        let timeout = self.config.acquire_timeout;
        let wait = tokio::time::timeout(timeout, shared.semaphore.clone().acquire_owned());
        let permit = tokio::select! {
            _ = shared.shutdown.cancelled() => return Err(ResourceUnavailable::ShuttingDown),
            res = wait => match res {
                Err(_) => return Err(ResourceUnavailable::Timeout(timeout)),
                Ok(Err(_)) => return Err(ResourceUnavailable::ShuttingDown),
                Ok(Ok(permit)) => permit,
            },
        };

        while let Some(session) = shared.pop_idle() {
            if session.is_alive() {
                debug!(session_id = %session.id(), "reusing idle session");
                return Ok(SessionLease::new(session, permit, shared.clone()));
            }
            warn!(session_id = %session.id(), "discarding defunct idle session");
            shared.destroy(session);
        }

        let session = shared
            .factory
            .create()
            .await
            .map_err(ResourceUnavailable::Creation)?;
        let live = shared.live.fetch_add(1, Ordering::SeqCst) + 1;
        info!(session_id = %session.id(), live, "created session");

        Ok(SessionLease::new(session, permit, shared.clone()))
    }

    /// Return a session for reuse. Equivalent to dropping the lease.
    pub fn release(&self, lease: SessionLease) {
        drop(lease);
    }

    /// Destroy a session found defunct; it will not be handed out again.
    pub fn invalidate(&self, lease: SessionLease) {
        lease.invalidate();
    }

    /// Destroy idle sessions, cancel pending acquires and signal outstanding
    /// leases. Leases returned afterwards are destroyed on return.
    pub fn shutdown(&self) {
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        self.shared.shutdown.cancel();
        self.shared.semaphore.close();

        let idle: Vec<Box<dyn Session>> = {
            let mut idle = self.shared.idle.lock().unwrap_or_else(|e| e.into_inner());
            idle.drain(..).collect()
        };
        let closed = idle.len();
        for session in idle {
            self.shared.destroy(session);
        }
        info!(closed, live = self.shared.live.load(Ordering::SeqCst), "session pool shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.shared.idle.lock().unwrap_or_else(|e| e.into_inner()).len(),
            live: self.shared.live.load(Ordering::SeqCst),
            max_size: self.config.max_size,
        }
    }
}

impl Drop for SessionPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Exclusive use of one pooled session.
///
/// Dereferences to the session. Dropping the lease returns the session to the
/// pool; [`SessionLease::invalidate`] destroys it instead.
pub struct SessionLease {
    session: Option<Box<dyn Session>>,
    shared: Arc<PoolShared>,
    cancel: CancellationToken,
    _permit: OwnedSemaphorePermit,
}

impl SessionLease {
    fn new(
        session: Box<dyn Session>,
        permit: OwnedSemaphorePermit,
        shared: Arc<PoolShared>,
    ) -> Self {
        let cancel = shared.shutdown.child_token();
        Self {
            session: Some(session),
            shared,
            cancel,
            _permit: permit,
        }
    }

    /// Cancelled when the pool shuts down while this lease is held.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn release(self) {
        drop(self);
    }

    pub fn invalidate(mut self) {
        if let Some(session) = self.session.take() {
            warn!(session_id = %session.id(), "invalidating session");
            self.shared.destroy(session);
        }
    }
}

impl Deref for SessionLease {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        self.session
            .as_deref()
            .expect("lease holds its session until consumed")
    }
}

impl DerefMut for SessionLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
            .as_deref_mut()
            .expect("lease holds its session until consumed")
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.shared.return_session(session);
        }
    }
}
