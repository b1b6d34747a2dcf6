//! Cron scheduling for the offer sync daemon.
//!
//! Wraps `tokio-cron-scheduler` with timezone support, overlap control,
//! start jitter and a registry of per-job run history. The `jobs` feature
//! registers the synchronization drivers and the worker dispatcher.
//!
//! # Example
//!
//! ```ignore
//! use sync_scheduler::{JitterConfig, OverlapPolicy, SchedulerConfig, SchedulerService};
//!
//! let scheduler = SchedulerService::new(SchedulerConfig::default()).await?;
//! scheduler
//!     .register_job("error_retry", "0 */10 * * * *", OverlapPolicy::Skip, JitterConfig::new(30), || async {
//!         Ok("nothing to retry".to_string())
//!     })
//!     .await?;
//! scheduler.start().await?;
//! ```

mod config;
mod error;
mod jitter;
mod overlap;
mod registry;
mod scheduler;

#[cfg(feature = "jobs")]
pub mod jobs;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use jitter::JitterConfig;
pub use overlap::{OverlapGuard, OverlapPolicy, RunPermit};
pub use registry::{JobRegistry, JobResult, JobStatus};
pub use scheduler::{validate_cron_expression, SchedulerService};
