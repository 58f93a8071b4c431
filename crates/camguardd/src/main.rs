//! camguardd - The camguard background service
//!
//! This is the main entry point for the camguardd service.
//! It wires together all the components:
//! - Configuration loading
//! - State store
//! - Core engine
//! - IPC server and the gateway bridge
//! - Browser automation worker

use anyhow::{Context, Result};
use camguard_browser::WebDriverClient;
use camguard_config::load_config;
use camguard_ipc::IpcServer;
use camguard_store::{JsonFileStore, PersistentStateStore};
use camguard_util::{default_config_path, state_file_path};
use camguardd::{IpcGateway, PendingActions, Service, ServiceParts};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// camguardd - Camera-on voice channel moderation and stream control
#[derive(Parser, Debug)]
#[command(name = "camguardd")]
#[command(about = "Camera-on voice channel moderation and stream control", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/camguard/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set CAMGUARD_SOCKET env var)
    #[arg(short, long, env = "CAMGUARD_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set CAMGUARD_DATA_DIR env var)
    #[arg(short, long, env = "CAMGUARD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

async fn build_service(args: &Args) -> Result<Service> {
    let policy = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    info!(
        config_path = %args.config.display(),
        monitored_channels = policy.channels.monitored.len(),
        "Configuration loaded"
    );

    let socket_path = args
        .socket
        .clone()
        .unwrap_or_else(|| policy.service.socket_path.clone());

    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(|| policy.service.data_dir.clone());

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

    // A malformed state file stops startup rather than being overwritten
    let state_path = state_file_path(&data_dir);
    let store = PersistentStateStore::open(
        Box::new(JsonFileStore::new(&state_path)),
        camguard_util::now(),
    )
    .with_context(|| format!("Failed to load state from {:?}", state_path))?;

    info!(state_path = %state_path.display(), "Store initialized");

    let driver = WebDriverClient::new(&policy.browser).context("Failed to set up WebDriver client")?;

    let mut ipc = IpcServer::new(&socket_path);
    ipc.start().await?;
    let ipc = Arc::new(ipc);

    info!(socket_path = %socket_path.display(), "IPC server started");

    let pending = PendingActions::new();
    let gateway = Arc::new(IpcGateway::new(ipc.clone(), pending.clone()));

    Service::new(ServiceParts {
        policy,
        store,
        ipc,
        gateway,
        pending,
        driver: Box::new(driver),
    })
    .await
}

/// Resolves on SIGTERM, SIGINT or SIGHUP
async fn wait_for_signal(mut sigterm: Signal, mut sigint: Signal, mut sighup: Signal) {
    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
        _ = sighup.recv() => info!("Received SIGHUP, shutting down gracefully"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "camguardd starting");

    if camguard_util::is_mock_time_active() {
        warn!("Mock time is active; wall-clock times are simulated");
    }

    let sigterm = signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
    let sigint = signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
    let sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

    let service = build_service(&args).await?;
    service.run(wait_for_signal(sigterm, sigint, sighup)).await
}
