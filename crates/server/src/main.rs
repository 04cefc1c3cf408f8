mod api;

use std::path::PathBuf;
use std::sync::Arc;

use agent_relay::{ClaudeSdkRuntime, Relay, RelayConfig};
use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::{AppState, create_router};

/// 指定配置文件路径的环境变量。
const CONFIG_PATH_ENV: &str = "AGENT_RELAY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "relay.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    info!("starting agent relay server");
    let config = load_config()?;

    let runtime = ClaudeSdkRuntime::new(config.agent.clone());
    let relay = Arc::new(
        Relay::new(&config, Arc::new(runtime)).context("failed to initialize relay")?,
    );
    let app = create_router(Arc::new(AppState::new(relay.clone())));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "server is ready, press Ctrl+C to shut down");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated unexpectedly")?;

    relay.shutdown().await;
    info!("server shutdown complete");
    Ok(())
}

fn load_config() -> anyhow::Result<RelayConfig> {
    let path = std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    if !path.exists() {
        warn!(path = %path.display(), "relay config not found, using defaults");
        return Ok(RelayConfig::default());
    }

    info!(path = %path.display(), "loading relay config");
    RelayConfig::from_file(&path)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received, stopping server");
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    Ok(())
}
