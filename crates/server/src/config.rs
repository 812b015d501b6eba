//! Daemon configuration.

use permafrost_core::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for `permafrostd`, loaded from a TOML file
/// with `PERMAFROST_`-prefixed environment overrides.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Bind address for the health/metrics endpoint.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Path of the SQLite metadata database.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Scheduler tunables.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            db_path: default_db_path(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7070".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/permafrost.db")
}
