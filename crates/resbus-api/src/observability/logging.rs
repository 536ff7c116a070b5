//! Structured logging configuration.
//!
//! Log output is either human-readable text for development or JSON for
//! production, selected by configuration. `RUST_LOG` overrides the
//! configured default level.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Configuration for structured logging.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Whether to use JSON format (true) or text format (false)
    pub json_format: bool,
    /// The default log level if RUST_LOG is not set
    pub default_level: Level,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json_format: false,
            default_level: Level::INFO,
        }
    }
}

impl LoggingConfig {
    /// JSON output for production.
    pub fn json() -> Self {
        Self {
            json_format: true,
            ..Default::default()
        }
    }

    /// Text output for development.
    pub fn text() -> Self {
        Self {
            json_format: false,
            ..Default::default()
        }
    }

    /// Set the default log level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }
}

/// Initialize the logging subsystem.
///
/// Should be called once at startup; subsequent calls have no effect
/// because the subscriber is global.
pub fn init_logging(config: LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_level.to_string()));

    if config.json_format {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true));
        let _ = tracing::subscriber::set_global_default(subscriber);
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true));
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

/// Parse a log level from its configuration string.
pub fn parse_log_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}
