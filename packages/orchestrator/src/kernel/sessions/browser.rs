//! Headless Chromium sessions.
//!
//! Each session owns a private profile directory, so cookies and logins
//! persist across navigations of the same session. Every navigation runs the
//! browser with `--dump-dom`; the serialized DOM becomes the inspected
//! document once loading finishes.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Session, SessionFactory, SessionOptions};

/// Slack on top of the page-load timeout for browser startup and teardown.
const STARTUP_GRACE: Duration = Duration::from_secs(10);

pub struct BrowserSessionFactory {
    binary: PathBuf,
    options: SessionOptions,
}

impl BrowserSessionFactory {
    /// Locate `binary` (a name on `PATH` or a path) and remember the options.
    pub fn new(binary: &str, options: SessionOptions) -> Result<Self> {
        let binary = which::which(binary)
            .with_context(|| format!("browser binary '{binary}' not found"))?;
        Ok(Self { binary, options })
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

#[async_trait]
impl SessionFactory for BrowserSessionFactory {
    async fn create(&self) -> Result<Box<dyn Session>> {
        let id = Uuid::new_v4();
        let profile_dir = self.options.profile_dir.join(format!("session-{id}"));
        tokio::fs::create_dir_all(&profile_dir)
            .await
            .with_context(|| format!("failed to create profile dir {}", profile_dir.display()))?;

        debug!(session_id = %id, profile = %profile_dir.display(), "browser session ready");

        Ok(Box::new(BrowserSession {
            id,
            binary: self.binary.clone(),
            profile_dir,
            options: self.options.clone(),
            loading: None,
            document: None,
            defunct: false,
        }))
    }
}

struct BrowserSession {
    id: Uuid,
    binary: PathBuf,
    profile_dir: PathBuf,
    options: SessionOptions,
    loading: Option<Child>,
    document: Option<String>,
    defunct: bool,
}

impl BrowserSession {
    fn command(&self, url: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        if self.options.headless {
            cmd.arg("--headless=new");
        }
        cmd.arg("--disable-gpu")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg(format!("--user-data-dir={}", self.profile_dir.display()));
        if self.options.accept_invalid_certs {
            cmd.arg("--ignore-certificate-errors");
        }
        cmd.arg(format!("--timeout={}", self.options.page_load_timeout.as_millis()))
            .arg("--dump-dom")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Session for BrowserSession {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        if self.defunct {
            bail!("session {} is defunct", self.id);
        }
        if let Some(mut previous) = self.loading.take() {
            let _ = previous.start_kill();
        }

        let mut cmd = self.command(url);
        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.defunct = true;
                bail!("failed to launch browser for {url}: {e}");
            }
        };
        self.loading = Some(child);
        self.document = None;
        Ok(())
    }

    async fn wait_until_loaded(&mut self) -> Result<()> {
        let Some(child) = self.loading.take() else {
            return if self.document.is_some() {
                Ok(())
            } else {
                Err(anyhow!("no navigation in progress"))
            };
        };

        let limit = self.options.page_load_timeout + STARTUP_GRACE;
        // Dropping the timed-out future drops the child, which kills it
        let output = tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("page did not load within {limit:?}"))?
            .context("failed to wait for browser")?;

        if !output.status.success() {
            if output.status.code().is_none() {
                // Killed by a signal: the client is no longer trustworthy
                self.defunct = true;
            }
            bail!("browser exited with {}", output.status);
        }

        self.document = Some(String::from_utf8_lossy(&output.stdout).into_owned());
        Ok(())
    }

    async fn inspect(&self) -> Result<String> {
        self.document
            .clone()
            .ok_or_else(|| anyhow!("no document loaded"))
    }

    fn is_alive(&self) -> bool {
        !self.defunct && self.binary.exists() && self.profile_dir.exists()
    }

    fn close(&mut self) {
        if let Some(mut child) = self.loading.take() {
            let _ = child.start_kill();
        }
        self.defunct = true;
        if let Err(e) = std::fs::remove_dir_all(&self.profile_dir) {
            warn!(session_id = %self.id, error = %e, "failed to remove browser profile");
        }
    }
}
