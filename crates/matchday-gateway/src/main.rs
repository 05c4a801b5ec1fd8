use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use matchday_core::MatchdayConfig;
use matchday_scheduler::{
    NotificationSink, Scheduler, SqliteConfigStore, SqliteExecutionLog, TracingNotifier,
};
use matchday_sync::{
    default_jobs, ApiFootballProvider, QueuedProvider, RateLimitedQueue, SqliteStore, SyncContext,
    SyncOrchestrator, SyncScope,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod app;
mod http;
mod maintenance;
mod notify;

/// How long shutdown waits for in-flight jobs.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "matchday-gateway", version, about = "Football data sync engine")]
struct Cli {
    /// Path to matchday.toml (defaults to ~/.matchday/matchday.toml).
    #[arg(long, short, env = "MATCHDAY_CONFIG", global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler and the admin HTTP API (default).
    Serve,
    /// Run one job now and print its execution record.
    Run { job: String },
    /// Run the phased full sync once and print the report.
    FullSync,
    /// Print every job's status.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "matchday_gateway=info,matchday_scheduler=info,matchday_sync=info,tower_http=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config / MATCHDAY_CONFIG > ~/.matchday/matchday.toml
    let config = MatchdayConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        MatchdayConfig::default()
    });

    let state = Arc::new(build_state(config)?);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(state).await?,
        Command::Run { job } => {
            let record = state.scheduler.run_job_now(&job).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            if !record.success {
                std::process::exit(1);
            }
        }
        Command::FullSync => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_signal.cancel();
                }
            });
            let report = state.orchestrator.full_sync(&cancel).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                std::process::exit(1);
            }
        }
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&state.scheduler.status())?);
        }
    }
    Ok(())
}

/// Open the database, build every subsystem and register all jobs.
fn build_state(config: MatchdayConfig) -> anyhow::Result<app::AppState> {
    // single SQLite file for all subsystems
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;

    // each subsystem gets its own connection
    let config_store = Arc::new(SqliteConfigStore::new(rusqlite::Connection::open(db_path)?)?);
    let executions = Arc::new(SqliteExecutionLog::new(rusqlite::Connection::open(db_path)?)?);
    let store = Arc::new(SqliteStore::new(rusqlite::Connection::open(db_path)?)?);
    info!("database migrations complete");

    let notifier: Arc<dyn NotificationSink> = match &config.notifications.webhook_url {
        Some(url) => {
            info!(%url, "job alerts go to webhook");
            Arc::new(notify::WebhookNotifier::new(url.clone()))
        }
        None => Arc::new(TracingNotifier),
    };

    if config.provider.api_key.is_none() {
        warn!("provider.api_key is not set; sync jobs will fail until it is configured");
    }
    let queue = RateLimitedQueue::new(config.provider.requests_per_minute);
    let http = ApiFootballProvider::new(
        &config.provider.base_url,
        config.provider.api_key.clone(),
        Duration::from_secs(config.provider.timeout_secs),
    )?;
    let provider = Arc::new(QueuedProvider::new(Arc::new(http), queue.clone()));

    let scope = SyncScope {
        season: config.sync.season,
        leagues: config.sync.leagues.clone(),
        countries: config.sync.countries.clone(),
        teams: config.sync.teams.clone(),
    };
    let ctx = SyncContext::new(provider, store, scope)
        .with_pacing(Duration::from_millis(config.provider.pacing_ms))
        .with_max_pages(config.provider.max_pages);
    let orchestrator = Arc::new(SyncOrchestrator::new(Arc::new(ctx)));

    let scheduler = Scheduler::new(config_store, executions.clone(), notifier);
    matchday_sync::register_all(&scheduler, &orchestrator, &config.jobs)?;
    maintenance::register(
        &scheduler,
        executions.clone(),
        config.scheduler.log_retention_days,
        &config.jobs,
    )?;

    let known: HashSet<&str> = default_jobs()
        .iter()
        .map(|j| j.job.id())
        .chain(std::iter::once(maintenance::LOG_RETENTION_JOB))
        .collect();
    for id in config.jobs.keys() {
        if !known.contains(id.as_str()) {
            warn!(job_id = %id, "override for unknown job ignored");
        }
    }

    Ok(app::AppState {
        config,
        scheduler,
        orchestrator,
        executions,
        queue,
    })
}

async fn serve(state: Arc<app::AppState>) -> anyhow::Result<()> {
    if state.config.scheduler.autostart {
        state.scheduler.start();
    } else {
        info!("scheduler autostart disabled; POST /scheduler/start to arm timers");
    }

    let addr: SocketAddr = format!("{}:{}", state.config.gateway.bind, state.config.gateway.port).parse()?;
    let router = app::build_router(state.clone());
    info!("Matchday gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    state.scheduler.stop();
    if !state.scheduler.drain(SHUTDOWN_GRACE).await {
        warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "jobs still running at shutdown were abandoned"
        );
    }
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
