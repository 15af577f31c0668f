use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub blob_directory: Option<String>,
    #[serde(default = "default_list_limit")]
    pub list_limit: u32,
    pub inference: InferenceConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
}

fn default_list_limit() -> u32 {
    50
}

impl Config {
    /// Configured database path, else `~/.batchrank/data/batchrank.db`.
    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(p) => Some(PathBuf::from(p)),
            None => crate::db::default_database_path(),
        }
    }

    /// Configured blob root, else `~/.batchrank/blobs`.
    pub fn blob_directory(&self) -> Option<PathBuf> {
        match &self.blob_directory {
            Some(p) => Some(PathBuf::from(p)),
            None => dirs::home_dir().map(|h| h.join(".batchrank").join("blobs")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_model_version")]
    pub model_version: String,
    /// Environment variable holding the bearer token, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_model_version() -> String {
    "unknown".to_string()
}

impl InferenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Reads the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_lease_timeout_secs")]
    pub lease_timeout_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_lease_timeout_secs() -> u64 {
    90
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            lease_timeout_secs: default_lease_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    30
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_error_backoff_ms() -> u64 {
    1000
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            error_backoff_ms: default_error_backoff_ms(),
        }
    }
}
