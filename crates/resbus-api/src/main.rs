//! resbus server binary.
//!
//! A self-describing hierarchical resource bus over HTTP.
//!
//! # Usage
//!
//! ```bash
//! # With config file
//! resbus --config config.yaml
//!
//! # With environment variables only
//! RESBUS_STORAGE__BACKEND=memory resbus
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::info;

use resbus_api::http::{
    create_router_with_body_limit, create_router_with_observability, AppState,
};
use resbus_api::observability::{init_logging, init_metrics, parse_log_level, LoggingConfig};
use resbus_server::ServerConfig;
use resbus_storage::{MemoryResourceStore, RedisConfig, RedisResourceStore, ResourceStore};

/// resbus - hierarchical resource bus over HTTP
#[derive(Parser, Debug)]
#[command(name = "resbus")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = if let Some(config_path) = args.config {
        ServerConfig::load(&config_path)?
    } else {
        ServerConfig::from_env()?
    };

    let log_config = LoggingConfig {
        json_format: config.logging.json,
        default_level: parse_log_level(&config.logging.level),
    };
    init_logging(log_config);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting resbus server");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    match config.storage.backend.as_str() {
        "memory" => {
            info!("Using in-memory storage backend");
            let store = Arc::new(MemoryResourceStore::new());
            run_server(store, &config, addr).await
        }
        "redis" => {
            info!(url = %config.storage.redis_url, "Connecting to Redis");
            let redis_config = RedisConfig {
                url: config.storage.redis_url.clone(),
                lock_lease_ms: config.storage.lock_lease_ms,
                lock_timeout_ms: config.storage.lock_timeout_ms,
                ..Default::default()
            };
            let store = RedisResourceStore::from_config(&redis_config).await?;
            info!("Redis connection established");
            run_server(Arc::new(store), &config, addr).await
        }
        other => {
            anyhow::bail!("Unknown storage backend: {other}");
        }
    }
}

/// Build the router for the selected backend and serve it with graceful
/// shutdown.
async fn run_server<S: ResourceStore>(
    store: Arc<S>,
    config: &ServerConfig,
    addr: SocketAddr,
) -> anyhow::Result<()> {
    let state = AppState::with_hook_settings(
        store,
        config.server.base_path.clone(),
        config.hooks.max_in_flight,
        Duration::from_secs(config.hooks.delivery_timeout_secs),
    );

    let router = if config.metrics.enabled {
        let metrics_state = init_metrics()?;
        info!("Metrics enabled at /metrics");
        create_router_with_observability(state, metrics_state, config.server.body_limit_bytes)
    } else {
        create_router_with_body_limit(state, config.server.body_limit_bytes)
    };

    info!(%addr, base_path = %config.server.base_path, "HTTP server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
