//! Overlap policy for scheduled runs.
//!
//! A run that fires while the previous run of the same job is still going
//! either proceeds alongside it or is skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Skip a run while the previous one is active
    #[default]
    Skip,

    /// Let runs overlap. Only for jobs whose work is split by atomic pops.
    Concurrent,
}

/// Tracks whether a job is running.
pub struct OverlapGuard {
    running: Arc<AtomicBool>,
    policy: OverlapPolicy,
}

impl OverlapGuard {
    pub fn new(policy: OverlapPolicy) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            policy,
        }
    }

    /// Returns a permit if the run may start, `None` if it must be skipped.
    pub fn try_acquire(&self) -> Option<RunPermit> {
        match self.policy {
            OverlapPolicy::Skip => self
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .ok()
                .map(|_| RunPermit {
                    flag: Some(self.running.clone()),
                }),
            OverlapPolicy::Concurrent => Some(RunPermit { flag: None }),
        }
    }

    /// Whether a skip-policy run is active. Always false for concurrent jobs.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn policy(&self) -> OverlapPolicy {
        self.policy
    }
}

/// Clears the running flag when dropped, including on panic.
pub struct RunPermit {
    flag: Option<Arc<AtomicBool>>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        if let Some(flag) = &self.flag {
            flag.store(false, Ordering::SeqCst);
        }
    }
}
