//! Binary entry point: load configuration, wire the pairing stack,
//! serve HTTP until interrupted, then shut everything down in order.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use pairgate::artifact::ArtifactStore;
use pairgate::config::PairingConfig;
use pairgate::handshake::{HandshakeDriver, LocalHandshakeDriver};
use pairgate::manager::PairingManager;
use pairgate::reaper::SessionReaper;
use pairgate::server::{PairingServer, ServerConfig};
use pairgate::store::SessionStore;

#[derive(Parser, Debug)]
#[command(name = "pairgate")]
#[command(about = "Pairing code issuance, verification and redemption service")]
#[command(version)]
struct Cli {
    /// Address to bind the HTTP server to (overrides PAIRGATE_BIND_ADDR)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Directory for per-session artifacts (overrides PAIRGATE_ARTIFACT_ROOT)
    #[arg(long)]
    artifact_root: Option<PathBuf>,

    /// Session lifetime in seconds (overrides PAIRGATE_SESSION_TTL_SECS)
    #[arg(long)]
    session_ttl: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pairgate=info,tower_http=warn".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = PairingConfig::from_env().context("failed to load configuration")?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(root) = cli.artifact_root {
        config.artifact_root = root;
    }
    if let Some(ttl) = cli.session_ttl {
        config.session_ttl = std::time::Duration::from_secs(ttl);
    }
    config.validate().context("invalid configuration")?;

    tracing::info!(
        bind = %config.bind_addr,
        artifact_root = %config.artifact_root.display(),
        session_ttl_secs = config.session_ttl.as_secs(),
        "Starting pairgate"
    );

    let store = SessionStore::new();
    let artifacts = ArtifactStore::new(&config.artifact_root)
        .context("failed to prepare artifact root")?;
    let driver: Arc<dyn HandshakeDriver> = Arc::new(LocalHandshakeDriver::new());

    let manager = Arc::new(PairingManager::new(
        config.clone(),
        store.clone(),
        artifacts.clone(),
        driver.clone(),
    ));

    let reaper = SessionReaper::new(&config, store, artifacts, driver);
    let reaper_handle = reaper.spawn();

    let mut server = PairingServer::new(
        ServerConfig {
            addr: config.bind_addr,
        },
        manager.clone(),
    );
    server.start().await.context("failed to start HTTP server")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Received interrupt, shutting down");

    server.shutdown().await;
    reaper_handle.abort();
    manager.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
