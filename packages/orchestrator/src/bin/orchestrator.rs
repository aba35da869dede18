//! Job orchestrator
//!
//! Drains submitted jobs once, or runs continuously alongside the cron
//! scheduler. Only one instance may work against a store at a time.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use orchestrator_core::config::Config;
use orchestrator_core::domains;
use orchestrator_core::kernel::jobs::{
    load_definitions, resolve_all, start_scheduler, Dispatcher, FireRecorder, InMemoryJobStore,
    Job, JobExecutor, JobParameters, JobStore, PostgresJobStore, SharedJobRegistry,
    TriggerHandler,
};
use orchestrator_core::kernel::sessions::{BrowserSessionFactory, SessionPool};
use orchestrator_core::kernel::{InstanceLock, InstanceLockError};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Exit status when another instance holds the lock (EX_TEMPFAIL).
const EXIT_LOCKED: u8 = 75;

#[derive(Parser)]
#[command(name = "orchestrator")]
#[command(about = "Booking automation job orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every submitted job once, then exit
    Drain,

    /// Start the scheduler and drain periodically until Ctrl+C
    Run,

    /// Insert a job directly
    Submit {
        kind: String,
        /// Job parameter as key=value; values may use TODAY, TODAY+N, TODAY-N
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },

    /// Print a job as JSON
    Status { id: Uuid },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

struct Stores {
    jobs: Arc<dyn JobStore>,
    fires: Arc<dyn FireRecorder>,
}

async fn open_stores(config: &Config) -> Result<Stores> {
    if config.uses_memory_store() {
        tracing::warn!("Using in-memory job store; jobs do not survive this process");
        let store = Arc::new(InMemoryJobStore::new());
        return Ok(Stores {
            jobs: store.clone(),
            fires: store,
        });
    }

    let store = PostgresJobStore::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    store.migrate().await.context("Failed to run migrations")?;
    tracing::info!("Database connected, migrations applied");

    let store = Arc::new(store);
    Ok(Stores {
        jobs: store.clone(),
        fires: store,
    })
}

fn session_pool(config: &Config) -> Result<Arc<SessionPool>> {
    let factory = BrowserSessionFactory::new(&config.browser_binary, config.session_options())?;
    tracing::info!(binary = %factory.binary().display(), "Browser located");
    Ok(Arc::new(SessionPool::new(Arc::new(factory), config.pool_config())))
}

fn dispatcher(
    stores: &Stores,
    registry: SharedJobRegistry,
    sessions: Arc<SessionPool>,
    config: Arc<Config>,
) -> Dispatcher {
    let executor = JobExecutor::new(stores.jobs.clone(), registry, sessions, config);
    Dispatcher::new(stores.jobs.clone(), executor)
}

async fn drain(config: Arc<Config>) -> Result<()> {
    let _lock = InstanceLock::acquire(&config.lock_path)?;
    let stores = open_stores(&config).await?;
    let sessions = session_pool(&config)?;
    let registry: SharedJobRegistry = Arc::new(domains::registry());

    let summary = dispatcher(&stores, registry, sessions.clone(), config.clone())
        .drain()
        .await;
    sessions.shutdown();

    let summary = summary?;
    println!(
        "{} completed, {} failed, {} skipped",
        summary.completed, summary.failed, summary.skipped
    );
    Ok(())
}

async fn run(config: Arc<Config>) -> Result<()> {
    let _lock = InstanceLock::acquire(&config.lock_path)?;
    let stores = open_stores(&config).await?;
    let sessions = session_pool(&config)?;
    let registry: SharedJobRegistry = Arc::new(domains::registry());

    let mut scheduler = match &config.schedule_file {
        Some(path) => {
            let definitions = load_definitions(path)?;
            let handler = Arc::new(TriggerHandler::new(
                stores.jobs.clone(),
                stores.fires.clone(),
                registry.clone(),
            ));
            Some(start_scheduler(definitions, handler).await?)
        }
        None => {
            tracing::info!("No SCHEDULE_FILE set, scheduler disabled");
            None
        }
    };

    let dispatcher = dispatcher(&stores, registry, sessions.clone(), config.clone());
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    let signal_sessions = sessions.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            signal_cancel.cancel();
            // Interrupts page loads still running on leased sessions
            signal_sessions.shutdown();
        }
    });

    let mut interval = tokio::time::interval(config.drain_interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                // A broken store ends this drain only; the next tick retries
                if let Err(e) = dispatcher.drain_until(&cancel).await {
                    tracing::error!(error = %e, "Drain aborted");
                }
            }
        }
    }

    if let Some(scheduler) = scheduler.as_mut() {
        if let Err(e) = scheduler.shutdown().await {
            tracing::warn!(error = %e, "Scheduler did not shut down cleanly");
        }
    }
    sessions.shutdown();
    tracing::info!("Orchestrator stopped");
    Ok(())
}

async fn submit(config: Arc<Config>, kind: String, params: Vec<(String, String)>) -> Result<()> {
    let registry = domains::registry();
    if !registry.is_registered(&kind) {
        bail!(
            "unknown job kind '{}' (known: {})",
            kind,
            registry.registered_kinds().join(", ")
        );
    }

    let stores = open_stores(&config).await?;
    let templates: JobParameters = params.into_iter().collect();
    let job = Job::submitted(kind, resolve_all(&templates, Local::now().date_naive()));
    let id = stores.jobs.insert_job(&job).await?;
    println!("{id}");
    Ok(())
}

async fn status(config: Arc<Config>, id: Uuid) -> Result<()> {
    let stores = open_stores(&config).await?;
    let job = stores
        .jobs
        .get_job_by_id(id)
        .await?
        .with_context(|| format!("job {id} not found"))?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

async fn execute(cli: Cli) -> Result<()> {
    let config = Arc::new(Config::from_env().context("Failed to load configuration")?);
    match cli.command {
        Commands::Drain => drain(config).await,
        Commands::Run => run(config).await,
        Commands::Submit { kind, params } => submit(config, kind, params).await,
        Commands::Status { id } => status(config, id).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,orchestrator_core=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    match execute(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(InstanceLockError::Held(locked)) = e.downcast_ref::<InstanceLockError>() {
                tracing::error!(
                    path = %locked.path.display(),
                    "Another orchestrator instance is running"
                );
                return ExitCode::from(EXIT_LOCKED);
            }
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
