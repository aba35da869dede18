use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use dotenvy::dotenv;

use crate::kernel::sessions::{PoolConfig, SessionOptions};

/// Value of `DATABASE_URL` that selects the in-memory job store.
pub const MEMORY_DATABASE: &str = "memory";

/// Process configuration, loaded once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub lock_path: PathBuf,
    pub session_pool_max: usize,
    pub session_acquire_timeout: Duration,
    pub page_load_timeout: Duration,
    pub browser_binary: String,
    pub browser_profile_dir: PathBuf,
    pub schedule_file: Option<PathBuf>,
    pub drain_interval: Duration,
    pub snapshot_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: MEMORY_DATABASE.to_string(),
            lock_path: PathBuf::from("/tmp/orchestrator.lock"),
            session_pool_max: 2,
            session_acquire_timeout: Duration::from_secs(120),
            page_load_timeout: Duration::from_secs(60),
            browser_binary: "chromium".to_string(),
            browser_profile_dir: PathBuf::from("/tmp/orchestrator-profiles"),
            schedule_file: None,
            drain_interval: Duration::from_secs(60),
            snapshot_dir: PathBuf::from("./snapshots"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Missing keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            database_url: lookup("DATABASE_URL").context("DATABASE_URL must be set")?,
            lock_path: lookup("ORCHESTRATOR_LOCK_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.lock_path),
            session_pool_max: positive_or(&lookup, "SESSION_POOL_MAX", defaults.session_pool_max)?,
            session_acquire_timeout: secs_or(
                &lookup,
                "SESSION_ACQUIRE_TIMEOUT_SECS",
                defaults.session_acquire_timeout,
            )?,
            page_load_timeout: secs_or(
                &lookup,
                "PAGE_LOAD_TIMEOUT_SECS",
                defaults.page_load_timeout,
            )?,
            browser_binary: lookup("BROWSER_BINARY").unwrap_or(defaults.browser_binary),
            browser_profile_dir: lookup("BROWSER_PROFILE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.browser_profile_dir),
            schedule_file: lookup("SCHEDULE_FILE").map(PathBuf::from),
            drain_interval: secs_or(&lookup, "DRAIN_INTERVAL_SECS", defaults.drain_interval)?,
            snapshot_dir: lookup("SNAPSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.snapshot_dir),
        })
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url == MEMORY_DATABASE
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_size: self.session_pool_max,
            acquire_timeout: self.session_acquire_timeout,
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            headless: true,
            profile_dir: self.browser_profile_dir.clone(),
            accept_invalid_certs: true,
            page_load_timeout: self.page_load_timeout,
        }
    }
}

fn positive_or<F>(lookup: &F, key: &str, default: usize) -> Result<usize>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let value: usize = raw
        .parse()
        .with_context(|| format!("{key} must be a positive integer"))?;
    ensure!(value > 0, "{key} must be a positive integer, got 0");
    Ok(value)
}

fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .parse()
            .map(Duration::from_secs)
            .with_context(|| format!("{key} must be a number of seconds")),
        None => Ok(default),
    }
}
