//! Engine configuration

use serde::{Deserialize, Serialize};

/// Runtime settings for a [`crate::Conductor`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Version used when a schedule decision does not name one
    #[serde(default = "default_activity_version")]
    pub default_activity_version: String,

    /// Upper bound on decision cycles running at the same time
    #[serde(default = "default_max_concurrent_deciders")]
    pub max_concurrent_deciders: usize,

    /// Task lists registered at startup
    #[serde(default)]
    pub task_lists: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_activity_version: default_activity_version(),
            max_concurrent_deciders: default_max_concurrent_deciders(),
            task_lists: Vec::new(),
        }
    }
}

fn default_activity_version() -> String {
    "0.1.0".to_string()
}

fn default_max_concurrent_deciders() -> usize {
    64
}
