use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use applytrack_core::store::{SCHEDULED_JOBS_KEY, SECURITY_EVENTS_KEY};
use applytrack_core::{Clock, SqliteStore, SystemClock, TrackerConfig};
use applytrack_jobs::{JsonFileData, LogNotifier, TrackerExecutor};
use applytrack_ratelimit::RateLimiter;
use applytrack_scheduler::{JobScheduler, ScheduledJob};
use applytrack_security::{SecurityEvent, SecurityEventLog};
use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Background worker: runs scheduled reminders, digests, cleanup and
/// security checks until interrupted.
#[derive(Parser, Debug)]
#[command(name = "applytrack-worker", version, about)]
struct Cli {
    /// Path to applytrack.toml (defaults to ~/.applytrack/applytrack.toml).
    #[arg(long, env = "APPLYTRACK_CONFIG")]
    config: Option<String>,

    /// Run a single tick and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "applytrack_worker=info,applytrack_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = TrackerConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        TrackerConfig::default()
    });

    // one SQLite file, one row per snapshot blob
    let db_path = &config.storage.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening snapshot database");
    let job_store = SqliteStore::<Vec<ScheduledJob>>::open(db_path, SCHEDULED_JOBS_KEY)?;
    let event_store = SqliteStore::<Vec<SecurityEvent>>::open(db_path, SECURITY_EVENTS_KEY)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let security = Arc::new(SecurityEventLog::restore(
        config.security.clone(),
        Arc::clone(&clock),
        Arc::new(event_store),
    ));
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limits.clone(),
        Arc::clone(&clock),
    ));

    let applications_path = config
        .data
        .applications_path
        .clone()
        .unwrap_or_else(|| sibling_path(db_path, "applications.json"));
    let data = Arc::new(JsonFileData::open(&applications_path)?);

    let executor = Arc::new(TrackerExecutor::new(
        Arc::new(LogNotifier),
        data,
        Arc::clone(&security),
        Arc::clone(&clock),
    ));
    let scheduler = Arc::new(JobScheduler::new(
        config.scheduler.clone(),
        executor,
        Arc::new(job_store),
        Arc::clone(&clock),
    )?);
    info!(jobs = scheduler.get_jobs().len(), "scheduler ready");

    if cli.once {
        let report = scheduler.tick().await?;
        info!(
            executed = report.executed,
            rescheduled = report.rescheduled,
            removed = report.removed,
            failed = report.failed,
            deactivated = report.deactivated,
            "single tick complete"
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // rate-limit table cleanup on a timer instead of on every check
    let purge = {
        let limiter = Arc::clone(&limiter);
        let mut shutdown = shutdown_rx.clone();
        let period = Duration::from_secs(config.scheduler.poll_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let purged = limiter.purge_expired();
                        if purged > 0 {
                            debug!(purged, remaining = limiter.len(), "expired rate-limit entries purged");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    };

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl-C handler failed ({}), running until killed", e);
            return;
        }
        info!("interrupt received, shutting down");
        let _ = shutdown_tx.send(true);
    });

    scheduler.run(shutdown_rx).await?;
    purge.abort();
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

fn sibling_path(path: &str, file_name: &str) -> String {
    Path::new(path)
        .with_file_name(file_name)
        .to_string_lossy()
        .into_owned()
}
