//! Configuration management for the resbus server.
//!
//! Configuration is assembled from three sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! Environment variables take precedence over config file values, which
//! take precedence over defaults, following the 12-factor app pattern.
//! Variables are prefixed with `RESBUS_` and use `__` as the nested key
//! separator, e.g. `RESBUS_SERVER__PORT=9090` overrides `server.port`.

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Server configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    /// Server settings
    #[serde(default)]
    pub server: ServerSettings,

    /// Storage settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Hook fanout settings
    #[serde(default)]
    pub hooks: HookSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Metrics settings
    #[serde(default)]
    pub metrics: MetricsSettings,
}

/// Server network settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServerSettings {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Mount prefix under which the resource tree is served
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Maximum request body size in bytes
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_path: default_base_path(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_base_path() -> String {
    "/".to_string()
}

fn default_body_limit() -> usize {
    1024 * 1024
}

/// Storage backend settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StorageSettings {
    /// Storage backend type: "memory" or "redis"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Redis connection URL (used when backend is "redis")
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Lease on a held per-resource lock, in milliseconds
    #[serde(default = "default_lock_lease_ms")]
    pub lock_lease_ms: u64,

    /// Give up acquiring a per-resource lock after this long, in milliseconds
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            redis_url: default_redis_url(),
            lock_lease_ms: default_lock_lease_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_lock_lease_ms() -> u64 {
    5_000
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

/// Hook fanout settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct HookSettings {
    /// Maximum number of hook deliveries in flight at once
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Timeout per hook delivery attempt, in seconds
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,
}

impl Default for HookSettings {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            delivery_timeout_secs: default_delivery_timeout(),
        }
    }
}

fn default_max_in_flight() -> usize {
    64
}

fn default_delivery_timeout() -> u64 {
    10
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MetricsSettings {
    /// Enable the Prometheus metrics endpoint
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ServerConfig {
    /// Load configuration from a YAML file with environment variable
    /// overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(
                Environment::with_prefix("RESBUS")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(
                Environment::with_prefix("RESBUS")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.server.port == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "server.port must be greater than 0".to_string(),
            });
        }

        if !self.server.base_path.starts_with('/') {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "server.base_path must start with '/', got: {}",
                    self.server.base_path
                ),
            });
        }

        let valid_backends = ["memory", "redis"];
        if !valid_backends.contains(&self.storage.backend.as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "storage.backend must be one of: {:?}, got: {}",
                    valid_backends, self.storage.backend
                ),
            });
        }

        if self.storage.backend == "redis" && self.storage.redis_url.trim().is_empty() {
            return Err(ConfigLoadError::Invalid {
                message: "storage.redis_url is required when backend is 'redis'".to_string(),
            });
        }

        if self.hooks.max_in_flight == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "hooks.max_in_flight must be greater than 0".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "logging.level must be one of: {:?}, got: {}",
                    valid_levels, self.logging.level
                ),
            });
        }

        Ok(())
    }
}
