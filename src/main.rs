//! Packetframe Control Plane Entry Point
//!
//! This binary runs the control plane with:
//! - HTTP API for zone and record management
//! - Edge agent registration and operator authorization
//! - WebSocket admission handshake for edge agents
//! - SQLite persistence for zones and agents
//!
//! ## Usage
//!
//! ```bash
//! # Run with default configuration
//! packetframe-control
//!
//! # Run with custom config file
//! packetframe-control --config /path/to/control.toml
//!
//! # Development mode (in-memory store)
//! PACKETFRAME_DEVELOPMENT=1 packetframe-control --api-addr 127.0.0.1:8000
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use packetframe_control::api::ControlApi;
use packetframe_control::config::{ControlConfig, StoreBackend};
use packetframe_control::dns::ZoneStore;
use packetframe_control::eca::{AdmissionHandler, EcaRegistry};
use packetframe_control::store::create_store;

/// Environment switch that forces the in-memory store
const DEVELOPMENT_ENV: &str = "PACKETFRAME_DEVELOPMENT";

/// Packetframe Control Plane
#[derive(Parser, Debug)]
#[command(name = "packetframe-control")]
#[command(author = "Packetframe Team")]
#[command(version)]
#[command(about = "Packetframe CDN control plane", long_about = None)]
struct Args {
    /// Path to configuration file (TOML or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API listen address (overrides config)
    #[arg(long)]
    api_addr: Option<SocketAddr>,

    /// Data directory for the SQLite database (overrides store.path)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Use the in-memory store (nothing persisted)
    #[arg(long)]
    in_memory: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!("Starting Packetframe control plane v{}", env!("CARGO_PKG_VERSION"));

    // Load or create configuration
    let mut config = match &args.config {
        Some(path) => ControlConfig::from_file(path)?,
        None => ControlConfig::default(),
    };

    // Override with command line arguments
    if let Some(addr) = args.api_addr {
        config.api.addr = addr;
    }
    if let Some(data_dir) = &args.data_dir {
        config.store.path = Some(data_dir.join("control.db"));
    }
    if args.in_memory {
        config.store.backend = StoreBackend::Memory;
    }
    if std::env::var_os(DEVELOPMENT_ENV).is_some() {
        info!("{} set, using in-memory store", DEVELOPMENT_ENV);
        config.store.backend = StoreBackend::Memory;
    }

    // Validate configuration
    config.validate()?;

    if config.store.backend == StoreBackend::Sqlite {
        if let Some(parent) = config.store.path.as_ref().and_then(|p| p.parent()) {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    let store = create_store(&config.store_config())?;
    let zones = Arc::new(ZoneStore::new(store.clone()));
    let registry = Arc::new(EcaRegistry::new(store));
    let admission = Arc::new(AdmissionHandler::new(
        registry.clone(),
        config.admission.handshake_timeout(),
    ));

    if config.api.operator_token.is_none() {
        warn!("No operator token configured; operator endpoints are disabled");
    }

    info!("Control plane configuration:");
    info!("  API: {}", config.api.addr);
    match &config.store.path {
        Some(path) if config.store.backend == StoreBackend::Sqlite => info!("  Store: sqlite ({})", path.display()),
        _ => info!("  Store: memory"),
    }
    info!(
        "  Admission: {}s handshake timeout, {} max sessions",
        config.admission.handshake_timeout_secs, config.admission.max_sessions
    );

    let api = Arc::new(ControlApi::new(
        zones,
        registry,
        admission,
        config.api.operator_token.clone(),
        config.admission.max_sessions,
    ));

    tokio::select! {
        result = api.run(config.api.addr) => {
            if let Err(e) = result {
                error!("Control API server error: {}", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    Ok(())
}
