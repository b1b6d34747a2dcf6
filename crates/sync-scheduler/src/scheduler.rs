//! Scheduler service wrapper around tokio-cron-scheduler.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono_tz::Tz;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::jitter::JitterConfig;
use crate::overlap::{OverlapGuard, OverlapPolicy};
use crate::registry::{JobRegistry, JobResult};
use crate::{SchedulerConfig, SchedulerError};

/// Validate a 6-field cron expression (seconds first).
///
/// ```
/// use sync_scheduler::validate_cron_expression;
///
/// assert!(validate_cron_expression("0 */10 * * * *").is_ok());
/// assert!(validate_cron_expression("every minute").is_err());
/// ```
pub fn validate_cron_expression(expr: &str) -> Result<(), SchedulerError> {
    Job::new_async(expr, |_uuid, _lock| Box::pin(async {}))
        .map(|_| ())
        .map_err(|e| SchedulerError::InvalidCron(format!("'{}': {}", expr, e)))
}

/// Owns the cron scheduler, the job registry and the shutdown token.
pub struct SchedulerService {
    scheduler: JobScheduler,
    config: SchedulerConfig,
    timezone: Tz,
    registry: Arc<JobRegistry>,
    shutdown_token: CancellationToken,
    is_running: AtomicBool,
}

impl SchedulerService {
    /// Create a stopped scheduler. Fails on an unknown timezone.
    pub async fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let timezone = config.parse_timezone()?;
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            config,
            timezone,
            registry: Arc::new(JobRegistry::new()),
            shutdown_token: CancellationToken::new(),
            is_running: AtomicBool::new(false),
        })
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }
        self.scheduler.start().await?;
        info!(jobs = self.registry.job_count(), timezone = %self.timezone.name(), "Scheduler started");
        Ok(())
    }

    /// Stop firing jobs and give running ones the grace period to finish.
    pub async fn shutdown(&mut self) -> Result<(), SchedulerError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning);
        }
        info!("Initiating scheduler shutdown");
        self.shutdown_token.cancel();

        let grace = Duration::from_secs(self.config.shutdown_grace_secs);
        let deadline = Instant::now() + grace;
        while self.registry.get_all_status().iter().any(|s| s.active_runs > 0) {
            if Instant::now() >= deadline {
                warn!("Jobs still running after shutdown grace period");
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if let Err(e) = self.scheduler.shutdown().await {
            warn!(error = %e, "Error during scheduler shutdown");
        }
        self.is_running.store(false, Ordering::SeqCst);
        info!("Scheduler shutdown complete");
        Ok(())
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        self.registry.clone()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Register a job.
    ///
    /// Each firing is skipped after shutdown started, or while a previous
    /// run is active under [`OverlapPolicy::Skip`]. Otherwise it waits for
    /// the jitter delay, runs `job_fn` and records the outcome in the
    /// registry. `job_fn` returns a summary line or an error message.
    pub async fn register_job<F, Fut>(
        &self,
        name: &str,
        cron_expr: &str,
        overlap: OverlapPolicy,
        jitter: JitterConfig,
        job_fn: F,
    ) -> Result<uuid::Uuid, SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        validate_cron_expression(cron_expr)?;
        if !self.registry.register(name, cron_expr, overlap) {
            return Err(SchedulerError::DuplicateJob(name.to_string()));
        }

        let job_name = name.to_string();
        let registry = self.registry.clone();
        let guard = Arc::new(OverlapGuard::new(overlap));
        let shutdown_token = self.shutdown_token.clone();
        let job_fn = Arc::new(job_fn);

        let job = Job::new_async_tz(cron_expr, self.timezone, move |_uuid, _lock| {
            let name = job_name.clone();
            let registry = registry.clone();
            let guard = guard.clone();
            let token = shutdown_token.clone();
            let job_fn = job_fn.clone();

            Box::pin(async move {
                if token.is_cancelled() {
                    return;
                }
                let Some(_permit) = guard.try_acquire() else {
                    info!(job = %name, "Previous run still active, skipping");
                    registry.record_skip(&name);
                    return;
                };
                jitter.delay().await;

                registry.record_start(&name);
                let start = Instant::now();
                let result = match job_fn().await {
                    Ok(summary) => {
                        info!(job = %name, duration_ms = start.elapsed().as_millis(), %summary, "Job completed");
                        JobResult::Success(summary)
                    }
                    Err(error) => {
                        warn!(job = %name, duration_ms = start.elapsed().as_millis(), %error, "Job failed");
                        JobResult::Failed(error)
                    }
                };
                registry.record_complete(&name, result, start.elapsed().as_millis() as u64);
            })
        })
        .map_err(|e| SchedulerError::InvalidCron(e.to_string()))?;

        let uuid = self.scheduler.add(job).await?;
        info!(job = %name, %uuid, cron = %cron_expr, ?overlap, "Job registered");
        Ok(uuid)
    }
}
