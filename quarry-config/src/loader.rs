//! Configuration loading and environment variable handling

use crate::domains::logging::{LogFormat, LogLevel, LoggingConfig};
use crate::domains::store::{StoreBackend, StoreConfig};
use crate::domains::utils::seconds_to_duration;
use crate::domains::worker::WorkerConfig;
use crate::domains::QuarryConfig;
use crate::error::{ConfigError, ConfigResult};
use quarry_core::IsolationMode;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "QUARRY".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<QuarryConfig> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration file");
        let content = std::fs::read_to_string(path)?;
        let mut config: QuarryConfig = serde_yaml::from_str(&content)?;

        // Apply environment variable overrides
        self.apply_env_overrides(&mut config)?;

        // Validate all domains
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<QuarryConfig> {
        let mut config = QuarryConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<QuarryConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut QuarryConfig) -> ConfigResult<()> {
        self.apply_worker_overrides(&mut config.worker)?;
        self.apply_store_overrides(&mut config.store)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    /// Apply worker config overrides
    fn apply_worker_overrides(&self, config: &mut WorkerConfig) -> ConfigResult<()> {
        if let Ok(queues) = self.get_env_var("QUEUES") {
            config.queues = queues.split(',').map(|q| q.trim().to_string()).collect();
        }

        if let Ok(interval) = self.get_env_var("INTERVAL") {
            config.interval = self.parse_seconds("INTERVAL", &interval)?;
        }

        if let Ok(timeout) = self.get_env_var("TERM_TIMEOUT") {
            config.term_timeout = self.parse_seconds("TERM_TIMEOUT", &timeout)?;
        }

        if let Ok(term_child) = self.get_env_var("TERM_CHILD") {
            config.term_child = parse_flag("TERM_CHILD", &term_child)?;
        }

        if let Ok(isolation) = self.get_env_var("ISOLATION") {
            config.isolation = IsolationMode::from_str(&isolation)
                .map_err(|e| ConfigError::EnvError(format!("Invalid ISOLATION: {}", e)))?;
        }

        if let Ok(verbose) = self.get_env_var("VERBOSE") {
            config.verbose = parse_flag("VERBOSE", &verbose)?;
        }

        if let Ok(very_verbose) = self.get_env_var("VERY_VERBOSE") {
            config.very_verbose = parse_flag("VERY_VERBOSE", &very_verbose)?;
        }

        Ok(())
    }

    /// Apply store config overrides
    fn apply_store_overrides(&self, config: &mut StoreConfig) -> ConfigResult<()> {
        if let Ok(backend) = self.get_env_var("STORE_BACKEND") {
            config.backend = StoreBackend::from_str(&backend).map_err(ConfigError::EnvError)?;
        }

        // Setting a redis URL selects the redis backend.
        if let Ok(url) = self.get_env_var("REDIS_URL") {
            config.url = url;
            config.backend = StoreBackend::Redis;
        }

        if let Ok(namespace) = self.get_env_var("NAMESPACE") {
            config.namespace = namespace;
        }

        Ok(())
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(&self, config: &mut LoggingConfig) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    fn parse_seconds(&self, name: &str, value: &str) -> ConfigResult<std::time::Duration> {
        let seconds: f64 = value
            .trim()
            .parse()
            .map_err(|e| ConfigError::EnvError(format!("Invalid {}: {}", name, e)))?;
        seconds_to_duration(seconds)
            .map_err(|e| ConfigError::EnvError(format!("Invalid {}: {}", name, e)))
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Boolean flags accept `true`/`false` as well as the `1`/`0` shell convention
fn parse_flag(name: &str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::EnvError(format!("Invalid {}: {}", name, other))),
    }
}
