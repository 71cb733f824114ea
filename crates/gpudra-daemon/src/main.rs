//! gpudra daemon
//!
//! Serves the GPU allocation engine for dynamic resource claims.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use gpudra_api::create_router;
use gpudra_core::{DaemonConfig, StorageBackend};
use gpudra_scheduler::AllocationEngine;
use gpudra_store::{FileStore, MemoryParameterSource, MemoryStore, NodeStateClient, NodeStateStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Storage backend selectable on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageArg {
    Memory,
    File,
}

impl From<StorageArg> for StorageBackend {
    fn from(arg: StorageArg) -> Self {
        match arg {
            StorageArg::Memory => StorageBackend::Memory,
            StorageArg::File => StorageBackend::File,
        }
    }
}

/// gpudra daemon - per-node GPU allocator for dynamic resource claims
#[derive(Parser, Debug)]
#[command(name = "gpudrad")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind the API server
    #[arg(long)]
    address: Option<String>,

    /// Port for the REST API server
    #[arg(long)]
    port: Option<u16>,

    /// Namespace holding node allocation state records
    #[arg(long)]
    namespace: Option<String>,

    /// Storage backend for node allocation state
    #[arg(long, value_enum)]
    storage: Option<StorageArg>,

    /// Directory for the file storage backend
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Timeout for a single store call, in seconds
    #[arg(long)]
    store_timeout_secs: Option<u64>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Load the config file, if any, and apply command line overrides
    fn into_config(self) -> anyhow::Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => DaemonConfig::default(),
        };

        if let Some(address) = self.address {
            config.api.rest_address = address;
        }
        if let Some(port) = self.port {
            config.api.rest_port = port;
        }
        if let Some(namespace) = self.namespace {
            config.controller.namespace = namespace;
        }
        if let Some(secs) = self.store_timeout_secs {
            config.controller.store_timeout_secs = secs;
        }
        if let Some(storage) = self.storage {
            config.storage.backend = storage.into();
        }
        if let Some(dir) = self.state_dir {
            config.storage.path = dir;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }

        Ok(config)
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

async fn open_store(config: &DaemonConfig) -> anyhow::Result<Arc<dyn NodeStateStore>> {
    match config.storage.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageBackend::File => {
            let store = FileStore::new(config.storage.path.clone());
            store
                .init()
                .await
                .with_context(|| format!("initializing {}", config.storage.path.display()))?;
            Ok(Arc::new(store))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(&config.logging.level))
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting log subscriber")?;

    info!("Starting gpudra daemon v{}", env!("CARGO_PKG_VERSION"));

    let store = open_store(&config).await?;
    let nodes = NodeStateClient::new(
        store,
        config.controller.namespace.clone(),
        config.controller.store_timeout(),
    );
    let parameters = Arc::new(MemoryParameterSource::new());
    let engine = Arc::new(AllocationEngine::new(nodes, parameters.clone()));

    let router = create_router(engine, parameters);

    let addr: SocketAddr = format!("{}:{}", config.api.rest_address, config.api.rest_port)
        .parse()
        .context("invalid API address")?;

    info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_defaults() {
        let args = Args::parse_from([
            "gpudrad",
            "--port",
            "8081",
            "--storage",
            "memory",
            "--namespace",
            "dra",
        ]);
        let config = args.into_config().unwrap();
        assert_eq!(config.api.rest_port, 8081);
        assert_eq!(config.api.rest_address, "0.0.0.0");
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.controller.namespace, "dra");
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("bogus"), Level::INFO);
    }
}
