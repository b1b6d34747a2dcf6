//! Job runners: start an isolated worker for one provider job.
//!
//! A worker resyncs the job's offers and releases the job's in-flight token
//! when it ends. The runner only starts it and reports a handle.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use sync_storage::SyncStore;
use sync_types::VenueProviderJob;
use thiserror::Error;
use tokio::process::Command;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::drivers::Synchronizer;

/// Error type for starting workers.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Runner unavailable: {0}")]
    Unavailable(String),
}

/// Starts workers for provider jobs.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Start a worker for `job` and return its handle.
    ///
    /// The job's in-flight token is already reserved when this is called.
    async fn start(&self, job: VenueProviderJob) -> Result<String, RunnerError>;

    /// Name for logging
    fn name(&self) -> &str;
}

/// Runs workers as tokio tasks inside the daemon.
pub struct TaskJobRunner {
    synchronizer: Arc<Synchronizer>,
}

impl TaskJobRunner {
    pub fn new(synchronizer: Arc<Synchronizer>) -> Self {
        Self { synchronizer }
    }
}

#[async_trait]
impl JobRunner for TaskJobRunner {
    async fn start(&self, job: VenueProviderJob) -> Result<String, RunnerError> {
        let handle = format!("task:{}", Uuid::new_v4());
        let synchronizer = self.synchronizer.clone();
        let task_handle = handle.clone();
        tokio::spawn(async move {
            // Errors are logged and the token released by run_provider_job
            let _ = synchronizer.run_provider_job(job).await;
            info!(handle = %task_handle, job = %job, "Worker task exited");
        });
        Ok(handle)
    }

    fn name(&self) -> &str {
        "task"
    }
}

/// Runs workers as child processes of the daemon binary.
///
/// The child is `<program> worker --job-id .. --provider-id .. --venue-id ..`,
/// which needs a queue store shared between processes. A background task
/// reaps the child and releases the token in case the child died without
/// doing so. That release only removes a token still carrying the child's
/// handle, so a newer worker of the same job keeps its token.
pub struct ProcessJobRunner {
    program: PathBuf,
    config_path: Option<PathBuf>,
    store: Arc<dyn SyncStore>,
}

impl ProcessJobRunner {
    pub fn new(program: PathBuf, store: Arc<dyn SyncStore>) -> Self {
        Self {
            program,
            config_path: None,
            store,
        }
    }

    /// Use the running executable as the worker program
    pub fn current_exe(store: Arc<dyn SyncStore>) -> Result<Self, RunnerError> {
        let program = std::env::current_exe()
            .map_err(|e| RunnerError::Unavailable(format!("cannot locate executable: {}", e)))?;
        Ok(Self::new(program, store))
    }

    /// Pass `--config <path>` to every worker
    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    fn command(&self, job: &VenueProviderJob) -> Command {
        let mut command = Command::new(&self.program);
        if let Some(path) = &self.config_path {
            command.arg("--config").arg(path);
        }
        command
            .arg("worker")
            .arg("--job-id")
            .arg(job.job_id.to_string())
            .arg("--provider-id")
            .arg(job.provider_id.to_string())
            .arg("--venue-id")
            .arg(job.venue_id.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(false);
        command
    }
}

#[async_trait]
impl JobRunner for ProcessJobRunner {
    async fn start(&self, job: VenueProviderJob) -> Result<String, RunnerError> {
        let mut child = self.command(&job).spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| RunnerError::Unavailable("worker exited before reporting a pid".to_string()))?;
        let handle = format!("pid:{}", pid);

        // The reaper matches on the handle, so record it before the child can exit
        if let Err(e) = self.store.set_in_flight_handle(job.job_id, &handle).await {
            warn!(pid, job = %job, error = %e, "Could not record worker handle");
        }

        let store = self.store.clone();
        let reaped_handle = handle.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => info!(pid, job = %job, "Worker process exited"),
                Ok(status) => warn!(pid, job = %job, %status, "Worker process failed"),
                Err(e) => error!(pid, job = %job, error = %e, "Could not wait for worker process"),
            }
            release_after_exit(store.as_ref(), &job, &reaped_handle).await;
        });
        Ok(handle)
    }

    fn name(&self) -> &str {
        "process"
    }
}

/// Drop the token of an exited worker if it still holds it.
async fn release_after_exit(store: &dyn SyncStore, job: &VenueProviderJob, handle: &str) {
    match store.release_in_flight_if(job.job_id, handle).await {
        Ok(true) => warn!(handle, job = %job, "Released token left by worker process"),
        Ok(false) => {}
        Err(e) => error!(handle, job = %job, error = %e, "Could not release in-flight token"),
    }
}
