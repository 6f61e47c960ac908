/*!
 * Configuration management for bridgescan.
 *
 * Layered loading of defaults, an optional configuration file and
 * prefixed environment variables into typed settings.
 */
use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::utils::optional_millis;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General configuration
    #[serde(default)]
    pub general: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Application environment (development, production, etc.)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (e.g. "info", "bridgescan_discovery=debug")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to include the event target in log lines
    #[serde(default = "default_log_target")]
    pub with_target: bool,
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Upper bound for a single participant run against one endpoint,
    /// in milliseconds (0 means no timeout)
    #[serde(default = "default_participant_timeout_ms")]
    pub participant_timeout_ms: u64,

    /// Upper bound for a whole scan round, in milliseconds (0 means no timeout)
    #[serde(default)]
    pub scan_timeout_ms: u64,

    /// Capacity of the scan event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl DiscoveryConfig {
    /// Per-participant timeout, if any
    pub fn participant_timeout(&self) -> Option<Duration> {
        optional_millis(self.participant_timeout_ms)
    }

    /// Whole-scan timeout, if any
    pub fn scan_timeout(&self) -> Option<Duration> {
        optional_millis(self.scan_timeout_ms)
    }

    /// Check the settings for values the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(Error::validation("discovery.event_capacity must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            environment: default_environment(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: default_log_target(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            participant_timeout_ms: default_participant_timeout_ms(),
            scan_timeout_ms: 0,
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_app_name() -> String {
    "bridgescan".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_target() -> bool {
    true
}

fn default_participant_timeout_ms() -> u64 {
    30_000
}

fn default_event_capacity() -> usize {
    100
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Set the environment variable prefix for configuration
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        let defaults = ConfigLib::try_from(&Config::default())
            .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?;
        let mut builder = ConfigLib::builder().add_source(defaults);

        if let Some(config_file) = self.config_file {
            if Path::new(&config_file).exists() {
                debug!("Loading configuration from {}", config_file);
                builder = builder.add_source(File::with_name(&config_file));
            } else {
                debug!("Configuration file {} does not exist, using defaults", config_file);
            }
        }

        if let Some(prefix) = self.environment_prefix {
            debug!("Loading configuration from environment variables with prefix {}", prefix);
            builder = builder.add_source(
                Environment::with_prefix(&prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: Config = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        config.discovery.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }
}
