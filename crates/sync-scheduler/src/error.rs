//! Scheduler error types.

use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

/// Errors raised while configuring or running the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Error from the underlying tokio-cron-scheduler
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Two jobs registered under one name
    #[error("Job already registered: {0}")]
    DuplicateJob(String),

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler is not running")]
    NotRunning,
}

impl From<JobSchedulerError> for SchedulerError {
    fn from(err: JobSchedulerError) -> Self {
        SchedulerError::Scheduler(err.to_string())
    }
}
