//! botbridge - Main Entry Point
//!
//! `run` keeps the bridge connected, ingests telemetry and serves the health
//! endpoints until SIGINT/SIGTERM or until reconnection gives up. `send`
//! publishes one command and exits.

use botbridge::bridge::Bridge;
use botbridge::config::{BridgeConfig, ConfigError};
use botbridge::error::{BridgeError, BridgeResult};
use botbridge::health::{BridgeHealthCheck, HealthCheckManager, StoreHealthCheck};
use botbridge::ingest::{IngestSettings, StatusSync, TelemetryIngestor};
use botbridge::observability::{init_default_logging, init_logging, HealthServer, LogFormat};
use botbridge::protocol::{Command, CommandKind, WorkerId};
use botbridge::store::MemoryStore;
use botbridge::transport::MqttTransport;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info, warn, Level};

/// Config files tried, in order, when `--config` is not given
const DEFAULT_CONFIG_PATHS: &[&str] = &["botbridge.toml", "config/botbridge.toml"];

/// Command and telemetry bridge for a trading bot fleet
#[derive(Parser)]
#[command(name = "botbridge")]
#[command(about = "Command and telemetry bridge between a trading dashboard and its bots")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "BOTBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge daemon
    Run {
        /// Worker whose status is mirrored into the store (repeatable)
        #[arg(long = "track", value_name = "WORKER")]
        track: Vec<String>,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Publish one command to a worker
    Send {
        /// Target worker id
        worker: String,
        /// start, stop, restart or config-update
        kind: CommandKind,
        /// JSON object overriding the default payload fields
        #[arg(long, value_name = "JSON")]
        payload: Option<String>,
        /// Strategy type, for start and config-update
        #[arg(long)]
        strategy_type: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(Level::DEBUG, LogFormat::Compact, false),
        _ => init_logging(Level::TRACE, LogFormat::Compact, true),
    };

    info!(version = env!("CARGO_PKG_VERSION"), "Starting botbridge");

    let result = match load_configuration(cli.config.as_deref()) {
        Ok(config) => match cli.command {
            Commands::Run { track } => run_bridge(config, track).await,
            Commands::Config { show } => handle_config_command(&config, show),
            Commands::Send {
                worker,
                kind,
                payload,
                strategy_type,
            } => send_command(config, &worker, kind, payload, strategy_type).await,
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        process::exit(e.exit_code());
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: Option<&Path>) -> BridgeResult<BridgeConfig> {
    if let Some(path) = config_path {
        info!(path = %path.display(), "Loading configuration");
        return Ok(BridgeConfig::load_from_file(path)?);
    }

    for candidate in DEFAULT_CONFIG_PATHS {
        let path = Path::new(candidate);
        if path.exists() {
            info!(path = %path.display(), "Loading configuration");
            return Ok(BridgeConfig::load_from_file(path)?);
        }
    }

    info!("No configuration file found, using defaults and environment");
    Ok(BridgeConfig::from_env()?)
}

fn build_bridge(config: &BridgeConfig) -> BridgeResult<Bridge> {
    let transport = Arc::new(MqttTransport::new(config.broker.clone()));
    Ok(Bridge::new(transport, config)?)
}

async fn run_bridge(config: BridgeConfig, track: Vec<String>) -> BridgeResult<()> {
    let tracked = track
        .into_iter()
        .map(WorkerId::new)
        .collect::<Result<Vec<_>, _>>()?;

    let bridge = build_bridge(&config)?;
    let store = Arc::new(MemoryStore::new());

    let ingestor = TelemetryIngestor::new(
        bridge.manager().clone(),
        bridge.scheme().clone(),
        store.clone(),
        IngestSettings::default(),
    );
    let status_sync = StatusSync::new(bridge.manager().clone(), bridge.scheme().clone(), store.clone());

    // Subscriptions registered before connecting are sent in the post-connect pass.
    ingestor.start().await;
    for worker in &tracked {
        status_sync.track(worker).await;
    }

    let mut checks = HealthCheckManager::new();
    checks.add_health_check(Box::new(BridgeHealthCheck::new(bridge.status())));
    checks.add_health_check(Box::new(StoreHealthCheck::new(store.clone())));

    let health_server = Arc::new(HealthServer::new(
        format!("botbridge-{}", config.topics.root),
        config.health.port,
        Arc::new(checks),
        bridge.status(),
        bridge.metrics().clone(),
    ));
    let (health_stop_tx, health_stop_rx) = oneshot::channel::<()>();
    let health_handle = tokio::spawn(async move {
        let shutdown = async {
            let _ = health_stop_rx.await;
        };
        if let Err(e) = health_server.start(shutdown).await {
            error!(error = %e, "Health server error");
        }
    });

    let outcome = match bridge.manager().ensure_connected().await {
        Ok(()) => {
            info!(broker = %config.broker.broker_url, "Bridge is running");
            wait_for_shutdown(&bridge).await
        }
        Err(e) => Err(BridgeError::from(e)),
    };

    info!("Bridge shutdown initiated");
    ingestor.stop().await;
    status_sync.shutdown().await;
    bridge.shutdown().await;

    let _ = health_stop_tx.send(());
    if let Err(e) = health_handle.await {
        warn!(error = %e, "Health server task ended abnormally");
    }

    outcome
}

/// Resolves on SIGINT/SIGTERM (`Ok`) or reconnection exhaustion (`Err`)
async fn wait_for_shutdown(bridge: &Bridge) -> BridgeResult<()> {
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut status = bridge.status();

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
            Ok(())
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
            Ok(())
        }
        exhausted = status.wait_for(|s| s.exhausted) => {
            let attempts = exhausted.map(|s| s.reconnect_attempts).unwrap_or_default();
            error!(attempts, "Broker connection permanently lost, shutting down");
            Err(BridgeError::ReconnectExhausted { attempts })
        }
    }
}

fn handle_config_command(config: &BridgeConfig, show: bool) -> BridgeResult<()> {
    if show {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::InvalidConfig(format!("Cannot render configuration: {e}")))?;
        println!("Current configuration:");
        println!("{rendered}");
    }

    info!("Configuration validation complete");
    Ok(())
}

async fn send_command(
    config: BridgeConfig,
    worker: &str,
    kind: CommandKind,
    payload: Option<String>,
    strategy_type: Option<String>,
) -> BridgeResult<()> {
    let worker = WorkerId::new(worker)?;
    let command = build_command(kind, payload.as_deref(), strategy_type)?;

    let bridge = build_bridge(&config)?;
    let result = bridge.publisher().publish(&worker, command).await;
    bridge.shutdown().await;
    result?;

    println!("Sent {kind} to {worker}");
    Ok(())
}

fn build_command(
    kind: CommandKind,
    payload: Option<&str>,
    strategy_type: Option<String>,
) -> BridgeResult<Command> {
    let mut overrides = match payload {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| BridgeError::invalid_input(format!("--payload is not valid JSON: {e}")))?,
        None => Value::Object(Default::default()),
    };

    if let Some(strategy_type) = strategy_type {
        match overrides.as_object_mut() {
            Some(object) => {
                object.insert("strategy_type".to_string(), Value::String(strategy_type));
            }
            None => return Err(BridgeError::invalid_input("--payload must be a JSON object")),
        }
    }

    Command::from_request(kind, overrides)
        .map_err(|e| BridgeError::invalid_input(format!("Invalid {kind} payload: {e}")))
}
