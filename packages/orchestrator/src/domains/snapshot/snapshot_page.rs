//! SnapshotPageJob - save the DOM of one page.
//!
//! Parameters:
//! - `url`: target, may contain `{name}` placeholders filled from the other
//!   parameters (typically resolved `TODAY+N` dates)
//! - `label`: file name prefix, defaults to `snapshot`
//! - `login_marker`: text that only appears on the site's login wall; when the
//!   page contains it the job ends as "not authorized" and nothing is written

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use tracing::{debug, info, warn};

use crate::kernel::jobs::{Job, JobContext, JobLogic, JobLogicError, JobOutcome, JobParameters};
use crate::kernel::sessions::Session;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{([A-Za-z0-9_]+)\}").unwrap();
}

const DEFAULT_LABEL: &str = "snapshot";

/// Replace every `{name}` in `template` with the parameter of that name.
///
/// Fails on the first placeholder without a matching parameter.
pub fn fill_placeholders(template: &str, parameters: &JobParameters) -> Result<String> {
    let mut missing = None;
    let filled = PLACEHOLDER.replace_all(template, |caps: &Captures| {
        let name = &caps[1];
        match parameters.get(name) {
            Some(value) => value.clone(),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(anyhow!("url placeholder '{{{name}}}' has no matching parameter")),
        None => Ok(filled.into_owned()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotPageJob {
    pub url_template: String,
    pub label: String,
    pub login_marker: Option<String>,
}

impl SnapshotPageJob {
    /// The job kind identifier used in the jobs table.
    pub const KIND: &'static str = "snapshot_page";

    pub fn from_job(job: &Job) -> Result<Self> {
        let url_template = job
            .parameter("url")
            .with_context(|| format!("job {} has no 'url' parameter", job.id))?
            .to_string();

        Ok(Self {
            url_template,
            label: sanitize_label(job.parameter("label").unwrap_or(DEFAULT_LABEL)),
            login_marker: job.parameter("login_marker").map(str::to_string),
        })
    }

    fn output_path(&self, ctx: &JobContext) -> PathBuf {
        ctx.config
            .snapshot_dir
            .join(format!("{}-{}.html", self.label, ctx.job_id))
    }
}

#[async_trait]
impl JobLogic for SnapshotPageJob {
    async fn process(&self, ctx: &JobContext) -> Result<JobOutcome, JobLogicError> {
        let url = fill_placeholders(&self.url_template, &ctx.parameters)?;
        let mut lease = ctx.sessions.acquire().await?;
        debug!(session_id = %lease.id(), url = %url, "loading page");

        let cancel = lease.cancellation().clone();
        let loaded = tokio::select! {
            _ = cancel.cancelled() => Err(anyhow!("session pool shut down while loading")),
            res = load(&mut *lease, &url) => res,
        };

        if let Err(e) = loaded {
            warn!(session_id = %lease.id(), error = %e, "page load failed, discarding session");
            ctx.sessions.invalidate(lease);
            return Err(e.context(format!("failed to load {url}")));
        }

        let document = lease.inspect().await?;
        ctx.sessions.release(lease);

        if let Some(marker) = &self.login_marker {
            if document.contains(marker.as_str()) {
                return Ok(JobOutcome::NotAuthorized {
                    reason: format!("{url} asked for a login"),
                });
            }
        }

        let path = self.output_path(ctx);
        tokio::fs::create_dir_all(&ctx.config.snapshot_dir)
            .await
            .with_context(|| format!("failed to create {}", ctx.config.snapshot_dir.display()))?;
        tokio::fs::write(&path, document.as_bytes())
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        info!(path = %path.display(), bytes = document.len(), "snapshot written");
        Ok(JobOutcome::Done)
    }
}

async fn load(session: &mut dyn Session, url: &str) -> Result<()> {
    session.navigate(url).await?;
    session.wait_until_loaded().await
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        DEFAULT_LABEL.to_string()
    } else {
        cleaned
    }
}
