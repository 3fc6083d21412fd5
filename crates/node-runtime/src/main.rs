//! # vx0net Node
//!
//! Runs one Backbone, Regional or Edge node of the overlay.
//!
//! ## Startup Sequence
//!
//! 1. Install logging (`RUST_LOG`, default `info`)
//! 2. Load the TOML configuration (first argument, `VX0_CONFIG`, or `vx0net.toml`)
//! 3. Apply `VX0_*` environment overrides and validate
//! 4. Start the peer engine: listeners, bootstrap sessions, service refresh
//! 5. Run until Ctrl+C, then close every session and withdraw its state

use anyhow::{Context, Result};
use node_runtime::{NodeConfig, NodeRuntime};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "vx0net.toml";

fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("VX0_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG))
}

fn load_config() -> Result<NodeConfig> {
    let path = config_path();
    let mut config = NodeConfig::load(&path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    let applied = config
        .apply_env()
        .context("applying environment overrides")?;
    for key in applied {
        info!("Applied override from {}", key);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let config = load_config()?;
    let engine_config = config
        .into_engine_config()
        .context("invalid node configuration")?;

    let runtime = NodeRuntime::start(engine_config).await?;

    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl+C")?;

    runtime.shutdown().await;
    Ok(())
}
