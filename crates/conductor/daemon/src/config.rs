//! Configuration for conductord

use conductor_engine::EngineConfig;
use conductor_worker::WorkerConfig;
use serde::{Deserialize, Serialize};

/// Main daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default = "default_worker")]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub demo: DemoConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            worker: default_worker(),
            logging: LoggingConfig::default(),
            demo: DemoConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Onboarding executions started at boot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    #[serde(default = "default_executions")]
    pub executions: usize,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            executions: default_executions(),
        }
    }
}

fn default_worker() -> WorkerConfig {
    WorkerConfig::new("test-tasklist-worker")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_executions() -> usize {
    3
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `CONDUCTOR_`-prefixed environment variables (`__` separates sections)
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CONDUCTOR")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.worker.task_list, "test-tasklist-worker");
        assert_eq!(config.worker.heartbeat_fraction, 0.45);
        assert_eq!(config.engine.max_concurrent_deciders, 64);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.demo.executions, 3);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = DaemonConfig::load(Some("does-not-exist")).unwrap();
        assert_eq!(config.worker.task_list, "test-tasklist-worker");
        assert_eq!(config.engine.default_activity_version, "0.1.0");
    }
}
