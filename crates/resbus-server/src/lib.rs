//! resbus-server: server configuration.

pub mod config;

pub use config::{ConfigLoadError, ServerConfig};
