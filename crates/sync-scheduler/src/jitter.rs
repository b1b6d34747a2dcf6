//! Random start delay for scheduled runs.
//!
//! Spreads runs of daemons sharing one queue store so their cron ticks do
//! not all hit the store and the catalog at the same instant.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Upper bound of the delay applied before a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct JitterConfig {
    /// 0 disables jitter
    pub max_jitter_secs: u64,
}

impl JitterConfig {
    pub fn new(max_jitter_secs: u64) -> Self {
        Self { max_jitter_secs }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.max_jitter_secs > 0
    }

    /// A delay in `[0, max_jitter_secs)`, millisecond resolution
    pub fn sample(&self) -> Duration {
        if !self.is_enabled() {
            return Duration::ZERO;
        }
        let millis = rand::rng().random_range(0..self.max_jitter_secs * 1000);
        Duration::from_millis(millis)
    }

    /// Sleep for a sampled delay
    pub async fn delay(&self) {
        let delay = self.sample();
        if !delay.is_zero() {
            tracing::debug!(jitter_ms = delay.as_millis(), "Delaying run");
            tokio::time::sleep(delay).await;
        }
    }
}
