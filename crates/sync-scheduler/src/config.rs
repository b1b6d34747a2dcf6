//! Scheduler configuration.

use serde::{Deserialize, Serialize};
use sync_types::ScheduleSettings;

use crate::SchedulerError;

/// Service-wide scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IANA timezone cron expressions are evaluated in
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// How long shutdown waits for running jobs after cancelling them
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_shutdown_grace() -> u64 {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_settings(settings: &ScheduleSettings) -> Self {
        Self {
            timezone: settings.timezone.clone(),
            ..Default::default()
        }
    }

    pub fn with_shutdown_grace_secs(mut self, secs: u64) -> Self {
        self.shutdown_grace_secs = secs;
        self
    }

    pub fn parse_timezone(&self) -> Result<chrono_tz::Tz, SchedulerError> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| SchedulerError::InvalidTimezone(self.timezone.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.timezone, "UTC");
        assert_eq!(config.parse_timezone().unwrap().name(), "UTC");
    }

    #[test]
    fn test_from_settings() {
        let settings = ScheduleSettings {
            timezone: "Europe/Paris".to_string(),
            ..Default::default()
        };
        let config = SchedulerConfig::from_settings(&settings);
        assert_eq!(config.parse_timezone().unwrap().name(), "Europe/Paris");
    }

    #[test]
    fn test_invalid_timezone() {
        let config = SchedulerConfig {
            timezone: "Mars/Olympus".to_string(),
            ..Default::default()
        };
        match config.parse_timezone() {
            Err(SchedulerError::InvalidTimezone(tz)) => assert_eq!(tz, "Mars/Olympus"),
            other => panic!("expected InvalidTimezone, got {other:?}"),
        }
    }
}
