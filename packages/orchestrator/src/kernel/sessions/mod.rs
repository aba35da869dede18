//! Automation sessions and the pool that owns them.
//!
//! A session is a stateful automation client (a headless browser profile).
//! Sessions are expensive and fragile, so jobs never construct them: they
//! lease one from the [`SessionPool`] and hand it back when done.

mod browser;
mod pool;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

pub use browser::BrowserSessionFactory;
pub use pool::{PoolConfig, PoolStats, SessionLease, SessionPool};

#[async_trait]
pub trait Session: Send + Sync {
    /// Stable identity, used to tell reused sessions apart.
    fn id(&self) -> Uuid;

    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Block until the last navigation finished loading or the page-load timeout elapsed.
    async fn wait_until_loaded(&mut self) -> Result<()>;

    /// Current document as HTML.
    async fn inspect(&self) -> Result<String>;

    /// Cheap liveness check run before a pooled session is handed out again.
    fn is_alive(&self) -> bool;

    /// Tear down the underlying client. Must not block.
    fn close(&mut self);
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn Session>>;
}

/// Startup options applied to every new session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub headless: bool,
    /// Root directory; each session gets its own profile below it.
    pub profile_dir: PathBuf,
    pub accept_invalid_certs: bool,
    pub page_load_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            headless: true,
            profile_dir: std::env::temp_dir().join("orchestrator-profiles"),
            accept_invalid_certs: true,
            page_load_timeout: Duration::from_secs(60),
        }
    }
}
