//! Run history of scheduled jobs.
//!
//! Every registered job gets a [`JobStatus`] updated at the start and end
//! of each run, so the daemon can report what ran, when, and how it went.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::overlap::OverlapPolicy;

/// Outcome of one run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobResult {
    /// Carries the driver's summary line
    Success(String),
    Failed(String),
    /// Not run because the previous run was still active
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_name: String,
    pub cron_expr: String,
    pub overlap: OverlapPolicy,
    pub last_started: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub last_result: Option<JobResult>,
    pub run_count: u64,
    pub failure_count: u64,
    pub skip_count: u64,
    /// Runs in progress; above one only for concurrent jobs
    pub active_runs: u32,
}

impl JobStatus {
    fn new(job_name: &str, cron_expr: &str, overlap: OverlapPolicy) -> Self {
        Self {
            job_name: job_name.to_string(),
            cron_expr: cron_expr.to_string(),
            overlap,
            last_started: None,
            last_duration_ms: None,
            last_result: None,
            run_count: 0,
            failure_count: 0,
            skip_count: 0,
            active_runs: 0,
        }
    }
}

/// Thread-safe map of job name to status.
///
/// Updates for unknown job names are ignored.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<BTreeMap<String, JobStatus>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Updates never panic midway; a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, JobStatus>> {
        self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, JobStatus>> {
        self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns false if the name is already taken.
    pub fn register(&self, job_name: &str, cron_expr: &str, overlap: OverlapPolicy) -> bool {
        let mut jobs = self.write();
        if jobs.contains_key(job_name) {
            return false;
        }
        jobs.insert(job_name.to_string(), JobStatus::new(job_name, cron_expr, overlap));
        true
    }

    pub fn record_start(&self, job_name: &str) {
        if let Some(status) = self.write().get_mut(job_name) {
            status.active_runs += 1;
            status.last_started = Some(Utc::now());
        }
    }

    pub fn record_complete(&self, job_name: &str, result: JobResult, duration_ms: u64) {
        if let Some(status) = self.write().get_mut(job_name) {
            status.active_runs = status.active_runs.saturating_sub(1);
            status.last_duration_ms = Some(duration_ms);
            status.run_count += 1;
            if matches!(result, JobResult::Failed(_)) {
                status.failure_count += 1;
            }
            status.last_result = Some(result);
        }
    }

    pub fn record_skip(&self, job_name: &str) {
        if let Some(status) = self.write().get_mut(job_name) {
            status.skip_count += 1;
            status.last_result = Some(JobResult::Skipped);
        }
    }

    pub fn get_status(&self, job_name: &str) -> Option<JobStatus> {
        self.read().get(job_name).cloned()
    }

    /// All statuses, ordered by job name
    pub fn get_all_status(&self) -> Vec<JobStatus> {
        self.read().values().cloned().collect()
    }

    pub fn is_registered(&self, job_name: &str) -> bool {
        self.read().contains_key(job_name)
    }

    pub fn is_running(&self, job_name: &str) -> bool {
        self.read()
            .get(job_name)
            .is_some_and(|status| status.active_runs > 0)
    }

    pub fn job_count(&self) -> usize {
        self.read().len()
    }
}
