//! Worker configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for one [`crate::ActivityWorker`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Task list this worker polls
    pub task_list: String,

    /// Identity reported on every poll
    #[serde(default = "default_identity")]
    pub identity: String,

    /// Activities executed at the same time
    #[serde(default = "default_max_concurrent_activities")]
    pub max_concurrent_activities: usize,

    /// Heartbeat period as a fraction of the task's heartbeat timeout, below 0.5
    #[serde(default = "default_heartbeat_fraction")]
    pub heartbeat_fraction: f64,

    /// Heartbeat timeout assumed when the task has none
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub default_heartbeat_timeout_secs: u64,

    /// Pause after a failed poll
    #[serde(default = "default_poll_retry_delay_ms")]
    pub poll_retry_delay_ms: u64,
}

impl WorkerConfig {
    pub fn new(task_list: impl Into<String>) -> Self {
        Self {
            task_list: task_list.into(),
            identity: default_identity(),
            max_concurrent_activities: default_max_concurrent_activities(),
            heartbeat_fraction: default_heartbeat_fraction(),
            default_heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            poll_retry_delay_ms: default_poll_retry_delay_ms(),
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_max_concurrent_activities(mut self, max: usize) -> Self {
        self.max_concurrent_activities = max;
        self
    }

    pub fn default_heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.default_heartbeat_timeout_secs)
    }

    pub fn poll_retry_delay(&self) -> Duration {
        Duration::from_millis(self.poll_retry_delay_ms)
    }
}

fn default_identity() -> String {
    format!("conductor-worker-{}", std::process::id())
}

fn default_max_concurrent_activities() -> usize {
    8
}

fn default_heartbeat_fraction() -> f64 {
    crate::heartbeat::DEFAULT_HEARTBEAT_FRACTION
}

fn default_heartbeat_timeout_secs() -> u64 {
    60
}

fn default_poll_retry_delay_ms() -> u64 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::new("users");
        assert_eq!(config.heartbeat_fraction, 0.45);
        assert_eq!(config.default_heartbeat_timeout(), Duration::from_secs(60));
        assert_eq!(config.poll_retry_delay(), Duration::from_secs(1));
        assert!(config.identity.starts_with("conductor-worker-"));
    }

    #[test]
    fn test_deserialize_minimal() {
        let config: WorkerConfig =
            serde_json::from_value(serde_json::json!({"task_list": "users"})).unwrap();
        assert_eq!(config.task_list, "users");
        assert_eq!(config.max_concurrent_activities, 8);
    }
}
