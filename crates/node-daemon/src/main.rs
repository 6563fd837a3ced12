//! Relay node daemon.
//!
//! Runs the cooperative scheduler against the simulated board on the host,
//! with an optional TCP bridge so the HTTP surface is reachable from a
//! browser or `curl`.

mod bridge;
mod signals;

use anyhow::{bail, Context, Result};
use clap::Parser;
use node_common::config::NodeConfig;
use node_common::error::NodeError;
use node_common::time::{Clock, SystemClock};
use node_runtime::sim::SimulatedBoard;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::bridge::TcpBridge;
use crate::signals::ShutdownSignal;

/// Relay node daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "relay-node",
    about = "Relay node daemon - 8 relays, sensors and a power meter behind a tiny HTTP server",
    version,
    long_about = None
)]
struct Args {
    /// Path to a node configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Host address bridged into the simulated Ethernet controller.
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Do not open the host TCP bridge.
    #[arg(long)]
    no_bridge: bool,

    /// Maximum ticks to run (0 = until signalled).
    #[arg(long, default_value = "0")]
    max_ticks: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting relay node daemon");

    let config = load_config(&args)?;
    config.validate().context("Invalid configuration")?;
    info!(
        ip = %config.network.ip,
        port = config.network.port,
        mac = %config.network.mac,
        "Configuration loaded"
    );

    let shutdown = ShutdownSignal::install().context("Failed to set up signal handlers")?;
    run_daemon(&config, &args, shutdown)
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "relay_node={level},node_runtime={level},node_ethernet={level},node_modbus={level},node_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `RELAY_NODE_CONFIG` environment variable
/// 3. `/etc/relay-node/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<NodeConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return NodeConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("RELAY_NODE_CONFIG") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from RELAY_NODE_CONFIG");
            return NodeConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from RELAY_NODE_CONFIG={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "RELAY_NODE_CONFIG set but file does not exist, checking other locations"
        );
    }

    for path in ["/etc/relay-node/config.toml", "config/default.toml"] {
        let config_path = PathBuf::from(path);
        if config_path.exists() {
            info!(?config_path, "Loading config file");
            return NodeConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from {config_path:?}"));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(NodeConfig::default())
}

fn run_daemon(config: &NodeConfig, args: &Args, shutdown: ShutdownSignal) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let board = SimulatedBoard::new();
    let mut scheduler = board
        .scheduler(config, Arc::clone(&clock))
        .context("Failed to assemble scheduler")?;

    let mut reset = board.chip().reset_pin();
    match scheduler.start_with_reset(&mut reset) {
        Ok(()) => {}
        Err(e @ NodeError::ChipNotFound { .. }) => {
            error!(error = %e, "Ethernet controller not found, giving up");
            bail!("bring-up failed: {e}");
        }
        Err(e) => return Err(e).context("Failed to start node"),
    }

    let mut bridge = if args.no_bridge {
        None
    } else {
        Some(
            TcpBridge::bind(
                args.listen,
                board.chip().clone(),
                config.network.socket,
                config.scheduler.max_request_bytes,
            )
            .with_context(|| format!("Failed to bind {}", args.listen))?,
        )
    };

    info!(state = %scheduler.state(), "Entering main loop");
    let mut ticks = 0u64;
    while scheduler.state().is_running() {
        if shutdown.requested() {
            info!("Shutdown signal received, stopping");
            break;
        }
        if let Some(bridge) = bridge.as_mut() {
            if let Err(e) = bridge.before_tick() {
                warn!(error = %e, "TCP bridge accept failed");
            }
        }

        scheduler.step();

        if let Some(bridge) = bridge.as_mut() {
            bridge.after_tick();
        }

        ticks += 1;
        if args.max_ticks > 0 && ticks >= args.max_ticks {
            info!(ticks, "Maximum tick count reached");
            shutdown.request();
        }
        if ticks % 10_000 == 0 {
            info!(
                ticks,
                served = scheduler.requests_served(),
                state = %scheduler.state(),
                "Periodic status"
            );
        }
    }

    if let Err(e) = scheduler.stop() {
        warn!(error = %e, "Scheduler stop failed");
    }
    info!(
        ticks,
        served = scheduler.requests_served(),
        forwarded = bridge.as_ref().map_or(0, TcpBridge::forwarded),
        signals = shutdown.signal_count(),
        uptime_ms = clock.now_ms(),
        final_state = %scheduler.state(),
        "Daemon shutdown complete"
    );
    Ok(())
}
