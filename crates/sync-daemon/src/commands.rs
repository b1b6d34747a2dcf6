//! Command implementations for the offer sync daemon.
//!
//! Handles:
//! - start: open the queue store, register the scheduled jobs, wait for a signal
//! - stop/status: PID file based process control
//! - run/worker: one driver invocation in the current process
//! - enqueue/queues/clear-index: operator tooling

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};

use sync_catalog::PgCatalog;
use sync_indexing::{
    Dispatcher, DispatcherConfig, DrainMode, DriverReport, HttpSearchIndex, JobRunner,
    ProcessJobRunner, SyncConfig, SyncTrigger, Synchronizer, TaskJobRunner,
};
use sync_scheduler::jobs::register_sync_jobs;
use sync_scheduler::{SchedulerConfig, SchedulerService};
use sync_storage::{
    open_store, InFlightStore, QueueName, QueueStats, StorageError, SyncQueues, SyncStore,
};
use sync_types::{RunnerKind, Settings, VenueProviderJob};

use crate::cli::{EnqueueCommands, RunCommands};

/// Load layered settings and apply the CLI log level.
pub fn load_settings(config_path: Option<&str>, log_level: Option<&str>) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(level) = log_level {
        settings.log_level = level.to_string();
    }
    Ok(settings)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

fn pid_file_path() -> PathBuf {
    Settings::runtime_dir().join("daemon.pid")
}

fn write_pid_file() -> Result<()> {
    let pid_path = pid_file_path();
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&pid_path, std::process::id().to_string())?;
    info!(path = ?pid_path, "Wrote PID file");
    Ok(())
}

fn remove_pid_file() {
    let pid_path = pid_file_path();
    if pid_path.exists() {
        if let Err(e) = fs::remove_file(&pid_path) {
            warn!(error = %e, "Failed to remove PID file");
        }
    }
}

fn read_pid_file() -> Option<u32> {
    fs::read_to_string(pid_file_path())
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    // Signal 0 only checks that the process exists
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

/// Open the configured queue store.
///
/// The RocksDB store belongs to one process at a time, so producers and
/// one-shot runs fail here while the daemon is up.
pub async fn open_queue_store(settings: &Settings) -> Result<Arc<dyn SyncStore>> {
    let path = settings.expanded_queue_store_path();
    match open_store(&settings.queue_store, &path).await {
        Ok(store) => Ok(store),
        Err(StorageError::Locked(path)) => anyhow::bail!(
            "queue store at {} is held by a running daemon; \
             use the postgres backend (queue_store.backend = \"postgres\") \
             for multi-process producers",
            path
        ),
        Err(e) => Err(e).with_context(|| {
            format!("Failed to open {:?} queue store", settings.queue_store.backend)
        }),
    }
}

/// Connect the catalog and the search index around `store`.
pub async fn build_synchronizer(
    settings: &Settings,
    store: Arc<dyn SyncStore>,
) -> Result<Arc<Synchronizer>> {
    let catalog = PgCatalog::connect(&settings.catalog)
        .await
        .context("Failed to connect to the catalog")?;
    let index = HttpSearchIndex::new(&settings.search_index)
        .context("Failed to configure the search index client")?;

    Ok(Arc::new(Synchronizer::new(
        Arc::new(catalog),
        Arc::new(index),
        SyncQueues::new(store),
        SyncConfig::from_settings(&settings.indexing),
    )))
}

fn build_runner(
    settings: &Settings,
    config_path: Option<&str>,
    store: Arc<dyn SyncStore>,
    synchronizer: Arc<Synchronizer>,
) -> Result<Arc<dyn JobRunner>> {
    let runner: Arc<dyn JobRunner> = match settings.dispatcher.runner {
        RunnerKind::Task => Arc::new(TaskJobRunner::new(synchronizer)),
        RunnerKind::Process => Arc::new(
            ProcessJobRunner::current_exe(store)?.with_config_path(config_path.map(PathBuf::from)),
        ),
    };
    Ok(runner)
}

/// Start the daemon.
///
/// 1. Open the queue store, the catalog and the search index
/// 2. Register the scheduled jobs
/// 3. Wait for SIGINT/SIGTERM, then let running jobs finish
pub async fn start_daemon(settings: &Settings, config_path: Option<&str>, foreground: bool) -> Result<()> {
    if let Some(pid) = read_pid_file() {
        if is_process_running(pid) && pid != std::process::id() {
            anyhow::bail!("Daemon already running (PID {})", pid);
        }
    }

    info!("Offer sync daemon starting...");
    info!(backend = ?settings.queue_store.backend, runner = ?settings.dispatcher.runner, "Configuration");

    if !foreground {
        warn!("Background mode is not supported, running in foreground");
        warn!("Use a process manager (systemd, launchd) for background operation");
    }

    let store = open_queue_store(settings).await?;
    let synchronizer = build_synchronizer(settings, store.clone()).await?;
    let runner = build_runner(settings, config_path, store.clone(), synchronizer.clone())?;
    let dispatcher = Arc::new(Dispatcher::new(
        SyncQueues::new(store),
        runner,
        DispatcherConfig::from_settings(&settings.dispatcher),
    ));

    let mut scheduler = SchedulerService::new(SchedulerConfig::from_settings(&settings.schedule))
        .await
        .context("Failed to create scheduler")?;
    register_sync_jobs(&scheduler, synchronizer, dispatcher, &settings.schedule)
        .await
        .context("Failed to register scheduled jobs")?;
    scheduler.start().await.context("Failed to start scheduler")?;

    write_pid_file()?;
    shutdown_signal().await;

    let result = scheduler.shutdown().await;
    for status in scheduler.registry().get_all_status() {
        info!(
            job = %status.job_name,
            runs = status.run_count,
            failures = status.failure_count,
            skips = status.skip_count,
            "Job summary"
        );
    }
    remove_pid_file();

    result.context("Scheduler shutdown failed")
}

/// Stop the running daemon by sending SIGTERM.
pub fn stop_daemon() -> Result<()> {
    let pid = read_pid_file().context("No PID file found - daemon may not be running")?;

    if !is_process_running(pid) {
        remove_pid_file();
        anyhow::bail!("Daemon not running (stale PID file removed)");
    }

    #[cfg(unix)]
    {
        if unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } != 0 {
            anyhow::bail!("Failed to send SIGTERM to daemon");
        }
        println!("Sent SIGTERM to daemon (PID {})", pid);
    }

    #[cfg(not(unix))]
    {
        anyhow::bail!("Stop command not supported on this platform");
    }

    Ok(())
}

pub fn show_status() -> Result<()> {
    let pid_path = pid_file_path();
    match read_pid_file() {
        Some(pid) if is_process_running(pid) => {
            println!("Offer sync daemon is running (PID {})", pid);
            println!("PID file: {:?}", pid_path);
        }
        Some(pid) => {
            println!("Offer sync daemon is NOT running (stale PID {} in {:?})", pid, pid_path);
        }
        None => println!("Offer sync daemon is NOT running (no PID file)"),
    }
    Ok(())
}

fn trigger_for(command: &RunCommands) -> Option<SyncTrigger> {
    let trigger = match *command {
        RunCommands::Drain { until_empty } => SyncTrigger::EventDriven(if until_empty {
            DrainMode::UntilEmpty
        } else {
            DrainMode::Cron
        }),
        RunCommands::ResyncAll {
            starting_page,
            ending_page,
        } => SyncTrigger::FullResync {
            starting_page,
            ending_page,
        },
        RunCommands::ResyncVenues => SyncTrigger::VenueResync,
        RunCommands::ResyncVenueProviders => SyncTrigger::ProviderVenueResync,
        RunCommands::SweepExpired { all } => SyncTrigger::ExpirationSweep { process_all: all },
        RunCommands::RetryErrors => SyncTrigger::ErrorRetry,
        RunCommands::Dispatch => return None,
    };
    Some(trigger)
}

/// Run one driver, or one dispatcher tick, and print its report.
pub async fn run_driver(settings: &Settings, config_path: Option<&str>, command: RunCommands) -> Result<()> {
    let store = open_queue_store(settings).await?;
    let synchronizer = build_synchronizer(settings, store.clone()).await?;

    let Some(trigger) = trigger_for(&command) else {
        let runner = build_runner(settings, config_path, store.clone(), synchronizer)?;
        let dispatcher = Dispatcher::new(
            SyncQueues::new(store.clone()),
            runner,
            DispatcherConfig::from_settings(&settings.dispatcher),
        );
        let report = dispatcher.tick().await?;
        println!(
            "{} dispatched, {} requeued, {} already in flight",
            report.dispatched, report.requeued, report.already_in_flight
        );
        if settings.dispatcher.runner == RunnerKind::Task {
            // Task workers die with this process
            wait_for_workers(store.as_ref()).await?;
        }
        return Ok(());
    };

    let report = synchronizer.run(trigger).await?;
    print_report(trigger.name(), &report);
    Ok(())
}

async fn wait_for_workers(store: &dyn SyncStore) -> Result<()> {
    loop {
        let count = store.in_flight_count().await?;
        if count == 0 {
            return Ok(());
        }
        info!(in_flight = count, "Waiting for workers");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

fn print_report(name: &str, report: &DriverReport) {
    println!("{}: {}", name, report);
    for failure in &report.totals.failures {
        println!(
            "  {} failed ({} ids requeued): {}",
            failure.phase, failure.requeued, failure.error
        );
    }
}

/// Synchronize one venue provider job. The in-flight token is released
/// whatever the outcome.
pub async fn run_worker(settings: &Settings, job: VenueProviderJob) -> Result<()> {
    info!(%job, "Worker starting");
    let store = open_queue_store(settings).await?;
    let synchronizer = build_synchronizer(settings, store).await?;
    let report = synchronizer
        .run_provider_job(job)
        .await
        .with_context(|| format!("Worker for {} failed", job))?;
    print_report("provider_job", &report);
    Ok(())
}

/// Push ids or a job to a queue. Returns how many items were new.
pub async fn enqueue(settings: &Settings, target: EnqueueCommands) -> Result<usize> {
    let queues = SyncQueues::new(open_queue_store(settings).await?);
    let added = match target {
        EnqueueCommands::Offers { ids, error } => {
            let queue = if error { QueueName::Error } else { QueueName::Main };
            queues.push_offers(queue, &ids).await?
        }
        EnqueueCommands::Venues { ids } => queues.push_venues(&ids).await?,
        EnqueueCommands::VenueProvider {
            job_id,
            provider_id,
            venue_id,
        } => {
            queues
                .push_provider_jobs(&[VenueProviderJob::new(job_id, provider_id, venue_id)])
                .await?
        }
    };
    Ok(added)
}

pub async fn queue_stats(settings: &Settings) -> Result<QueueStats> {
    let queues = SyncQueues::new(open_queue_store(settings).await?);
    Ok(queues.stats().await?)
}

pub async fn show_queues(settings: &Settings) -> Result<()> {
    let stats = queue_stats(settings).await?;
    for (queue, len) in &stats.lengths {
        println!("{:<16} {}", queue, len);
    }
    println!("{:<16} {}", "indexed", stats.indexed);
    if stats.in_flight.is_empty() {
        println!("No provider job in flight");
    }
    for token in &stats.in_flight {
        println!(
            "in flight: job {} since {} ({})",
            token.job_id,
            token.dispatched_at.to_rfc3339(),
            token.handle.as_deref().unwrap_or("starting")
        );
    }
    Ok(())
}

/// Empty the search index and forget what was indexed.
pub async fn clear_index(settings: &Settings, confirmed: bool) -> Result<()> {
    if !confirmed {
        anyhow::bail!("Refusing to clear the search index without --yes");
    }
    let store = open_queue_store(settings).await?;
    let synchronizer = build_synchronizer(settings, store).await?;
    let forgotten = synchronizer.indexer().clear_index().await?;
    println!("Search index cleared ({} indexed offers forgotten)", forgotten);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_file_path() {
        let path = pid_file_path();
        assert!(path.ends_with("daemon.pid"));
    }

    #[test]
    fn test_status_no_daemon() {
        assert!(show_status().is_ok());
    }

    #[test]
    fn test_run_commands_map_to_triggers() {
        assert_eq!(
            trigger_for(&RunCommands::Drain { until_empty: false }),
            Some(SyncTrigger::EventDriven(DrainMode::Cron))
        );
        assert_eq!(
            trigger_for(&RunCommands::Drain { until_empty: true }),
            Some(SyncTrigger::EventDriven(DrainMode::UntilEmpty))
        );
        assert_eq!(
            trigger_for(&RunCommands::SweepExpired { all: true }),
            Some(SyncTrigger::ExpirationSweep { process_all: true })
        );
        assert_eq!(
            trigger_for(&RunCommands::ResyncAll {
                starting_page: 2,
                ending_page: Some(4)
            }),
            Some(SyncTrigger::FullResync {
                starting_page: 2,
                ending_page: Some(4)
            })
        );
        assert_eq!(trigger_for(&RunCommands::RetryErrors), Some(SyncTrigger::ErrorRetry));
        assert_eq!(trigger_for(&RunCommands::Dispatch), None);
    }

    #[tokio::test]
    async fn test_clear_index_requires_confirmation() {
        let err = clear_index(&Settings::default(), false).await.unwrap_err();
        assert!(err.to_string().contains("--yes"));
    }
}
