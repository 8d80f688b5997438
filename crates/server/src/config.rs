//! Server configuration

use anyhow::{Context, Result};
use ecoopt_lib::dispatch::DEFAULT_DISPATCH_TIMEOUT;
use ecoopt_lib::forecast::{ResamplePolicy, TrainingConfig, DEFAULT_VERSIONS_TO_KEEP};
use ecoopt_lib::sampler::DEFAULT_HISTORY_CAPACITY;
use ecoopt_lib::{Server, ServerCatalog};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the optional config file
pub const CONFIG_PATH_ENV: &str = "ECOOPT_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "ecoopt.toml";

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Instance name attached to structured log events
    #[serde(default = "default_instance")]
    pub instance: String,

    /// Port for the HTTP API, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Directory holding versioned model artifacts
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    /// Usage sampling interval in seconds
    #[serde(default = "default_sampling_interval")]
    pub sampling_interval_secs: u64,

    /// Maximum random delay added to each sampling interval
    #[serde(default = "default_sampling_jitter")]
    pub sampling_jitter_ms: u64,

    /// Readings retained as training history
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Deadline for dispatched training and inference work
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_secs: u64,

    /// Model versions retained on disk
    #[serde(default = "default_versions_to_keep")]
    pub versions_to_keep: usize,

    /// How readings within an hour are combined before training
    #[serde(default)]
    pub resample_policy: ResamplePolicy,

    /// Fixed seed for the synthetic usage sampler
    #[serde(default)]
    pub sampler_seed: Option<u64>,

    #[serde(default = "default_servers")]
    pub servers: Vec<Server>,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "ecoopt".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("./artifacts")
}

fn default_sampling_interval() -> u64 {
    5
}

fn default_sampling_jitter() -> u64 {
    500
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_dispatch_timeout() -> u64 {
    DEFAULT_DISPATCH_TIMEOUT.as_secs()
}

fn default_versions_to_keep() -> usize {
    DEFAULT_VERSIONS_TO_KEEP
}

fn default_servers() -> Vec<Server> {
    ServerCatalog::default().to_vec()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            instance: default_instance(),
            api_port: default_api_port(),
            artifact_dir: default_artifact_dir(),
            sampling_interval_secs: default_sampling_interval(),
            sampling_jitter_ms: default_sampling_jitter(),
            history_capacity: default_history_capacity(),
            dispatch_timeout_secs: default_dispatch_timeout(),
            versions_to_keep: default_versions_to_keep(),
            resample_policy: ResamplePolicy::default(),
            sampler_seed: None,
            servers: default_servers(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the optional config file and environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::load_from(&path)
    }

    /// Load from `path` (missing is fine) with `ECOOPT_*` variables on top
    pub fn load_from(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("ECOOPT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        config
            .try_deserialize()
            .context("Invalid server configuration")
    }

    /// Validated server catalog
    pub fn catalog(&self) -> Result<ServerCatalog> {
        ServerCatalog::new(self.servers.clone()).context("Invalid server catalog")
    }

    pub fn sampling_interval(&self) -> Duration {
        Duration::from_secs(self.sampling_interval_secs.max(1))
    }

    pub fn sampling_jitter(&self) -> Duration {
        Duration::from_millis(self.sampling_jitter_ms)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs.max(1))
    }

    pub fn training_config(&self) -> TrainingConfig {
        TrainingConfig {
            resample_policy: self.resample_policy,
            ..TrainingConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.sampling_interval(), Duration::from_secs(5));
        assert_eq!(config.dispatch_timeout(), Duration::from_secs(10));
        assert_eq!(config.versions_to_keep, 5);
        assert_eq!(config.resample_policy, ResamplePolicy::Sum);
        assert_eq!(config.catalog().unwrap(), ServerCatalog::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
api_port = 9191
resample_policy = "mean"
sampler_seed = 7

[[servers]]
id = 10
capacity = 50.0
efficiency = 0.5
"#
        )
        .unwrap();

        let config = ServerConfig::load_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.api_port, 9191);
        assert_eq!(config.resample_policy, ResamplePolicy::Mean);
        assert_eq!(config.sampler_seed, Some(7));
        assert_eq!(config.training_config().resample_policy, ResamplePolicy::Mean);

        let catalog = config.catalog().unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].id, 10);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = ServerConfig::load_from("/nonexistent/ecoopt-config").unwrap();
        assert_eq!(config.servers.len(), 3);
        assert_eq!(config.history_capacity, DEFAULT_HISTORY_CAPACITY);
    }

    #[test]
    fn test_invalid_catalog_rejected() {
        let config = ServerConfig {
            servers: vec![Server::new(1, 100.0, 1.5)],
            ..ServerConfig::default()
        };
        assert!(config.catalog().is_err());
    }
}
