//! Configuration management for trisync
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use crate::retry::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Qdrant connection URL
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    /// Environment variable name for Qdrant API key
    #[serde(default = "default_qdrant_api_key_env")]
    pub qdrant_api_key_env: String,

    /// Root directory for relative storage locations
    #[serde(default = "default_storage_root")]
    pub storage_root: Option<String>,

    /// Remote (cloud) replica configuration
    #[serde(default)]
    pub cloud: CloudConfig,

    /// Retry policy for transient relational store failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Vector collection declarations
    #[serde(default)]
    pub vector: VectorConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Remote replica configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Base URL of the cloud API
    #[serde(default = "default_cloud_url")]
    pub url: String,

    /// Environment variable holding the API key
    #[serde(default = "default_cloud_api_key_env")]
    pub api_key_env: String,

    /// Header name the API key is sent in
    #[serde(default = "default_cloud_api_key_header")]
    pub api_key_header: String,

    /// Request timeout in seconds
    #[serde(default = "default_cloud_timeout")]
    pub timeout_secs: u64,

    /// Uploads in flight per sync run
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,

    /// Persist upload progress every N uploads
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,
}

/// Retry configuration (jittered exponential backoff)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in seconds
    #[serde(default = "default_retry_initial_delay")]
    pub initial_delay_secs: f64,

    /// Multiplier applied per attempt
    #[serde(default = "default_retry_factor")]
    pub factor: f64,

    /// Fraction of the delay used as +/- jitter
    #[serde(default = "default_retry_jitter")]
    pub jitter: f64,
}

/// Extra `Type.field` index declarations for the collection registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorConfig {
    #[serde(default)]
    pub extra_indexes: Vec<String>,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for trisync data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to the relational metadata database
    pub db_file: PathBuf,

    /// Path to the graph database
    pub graph_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            qdrant_url: default_qdrant_url(),
            qdrant_api_key_env: default_qdrant_api_key_env(),
            storage_root: default_storage_root(),
            cloud: CloudConfig::default(),
            retry: RetryConfig::default(),
            vector: VectorConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            url: default_cloud_url(),
            api_key_env: default_cloud_api_key_env(),
            api_key_header: default_cloud_api_key_header(),
            timeout_secs: default_cloud_timeout(),
            upload_concurrency: default_upload_concurrency(),
            progress_interval: default_progress_interval(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            initial_delay_secs: default_retry_initial_delay(),
            factor: default_retry_factor(),
            jitter: default_retry_jitter(),
        }
    }
}

impl RetryConfig {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_attempts,
            initial: Duration::from_secs_f64(self.initial_delay_secs),
            factor: self.factor,
            jitter: self.jitter,
        }
    }
}

impl CloudConfig {
    /// Get the cloud API key from environment
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok()
    }
}

impl Config {
    /// Get the default base directory for trisync (~/.trisync)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".trisync")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    pub(crate) fn paths_for(base: PathBuf, config_file: PathBuf) -> PathsConfig {
        PathsConfig {
            config_file,
            db_file: base.join("metadata.db"),
            graph_file: base.join("graph.db"),
            base_dir: base,
        }
    }

    /// Initialize paths configuration
    fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = Self::paths_for(base.clone(), base.join("config.toml"));
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = Self::paths_for(base, config_path.to_path_buf());

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Get the Qdrant API key from environment
    pub fn qdrant_api_key(&self) -> Option<String> {
        if self.qdrant_api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.qdrant_api_key_env).ok()
    }

    /// Check if trisync is initialized (config and DB exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.db_file.exists()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be >= 1".to_string()));
        }

        if self.retry.initial_delay_secs < 0.0 || !self.retry.initial_delay_secs.is_finite() {
            return Err(Error::Config(
                "retry.initial_delay_secs must be a non-negative number".to_string(),
            ));
        }

        if self.retry.factor < 1.0 {
            return Err(Error::Config("retry.factor must be >= 1.0".to_string()));
        }

        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(Error::Config(
                "retry.jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.cloud.upload_concurrency == 0 {
            return Err(Error::Config(
                "cloud.upload_concurrency must be positive".to_string(),
            ));
        }

        if self.cloud.progress_interval == 0 {
            return Err(Error::Config(
                "cloud.progress_interval must be positive".to_string(),
            ));
        }

        url::Url::parse(&self.cloud.url)
            .map_err(|e| Error::Config(format!("cloud.url is invalid: {}", e)))?;

        for declaration in &self.vector.extra_indexes {
            match declaration.split_once('.') {
                Some((ty, field)) if !ty.is_empty() && !field.is_empty() => {}
                _ => {
                    return Err(Error::Config(format!(
                        "vector.extra_indexes entry '{}' must look like 'Type.field'",
                        declaration
                    )))
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.cloud.api_key_header, "X-Api-Key");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.cloud.upload_concurrency = 8;
        config.vector.extra_indexes = vec!["Timestamp.time_at".to_string()];

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(loaded.cloud.upload_concurrency, 8);
        assert_eq!(loaded.vector.extra_indexes, vec!["Timestamp.time_at"]);
        assert_eq!(loaded.paths.graph_file, tmp.path().join("graph.db"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.retry.jitter = 1.5;
        assert!(config.validate().is_err());
        config.retry.jitter = 0.1;

        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
        config.retry.max_attempts = 3;

        config.vector.extra_indexes = vec!["NoField".to_string()];
        assert!(config.validate().is_err());
        config.vector.extra_indexes.clear();

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_policy_from_config() {
        let config = Config::default();
        let policy = config.retry.backoff_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial, Duration::from_secs(1));
        assert_eq!(policy.factor, 2.0);
    }
}
