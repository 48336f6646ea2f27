//! SerialChat command-line peer.
//!
//! Loads the configuration, builds the TCP-emulated adapter and a
//! [`ChatController`], then runs one subcommand:
//!
//! ```text
//! serialchat listen                 wait for a peer, then chat over stdin/stdout
//! serialchat connect <ADDRESS>      dial a peer, then chat over stdin/stdout
//! serialchat scan [--seconds N]     probe bonded peers and list what answered
//! serialchat paired                 list bonded peers
//! serialchat pair <NAME> <ADDRESS>  add or rename a bonded peer in the config
//! ```
//!
//! Ctrl-C releases the controller, which closes every socket, and exits.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serialchat::application::orchestrator::{ChatController, ConnectionStream};
use serialchat::application::permissions::{PermissionOracle, Permissions};
use serialchat::infrastructure::adapter::tcp::{TcpAdapter, TcpAdapterConfig};
use serialchat::infrastructure::storage::config::{self, AppConfig, ConfigError, ConfigPermissions, PeerEntry};
use serialchat_core::{ConnectionResult, PeerIdentity};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "serialchat", version, about = "Point-to-point text chat over a serial-style link")]
struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, env = "SERIALCHAT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Display name sent with every message.
    #[arg(long, env = "SERIALCHAT_NAME", global = true)]
    name: Option<String>,

    /// Port to listen on.
    #[arg(long, env = "SERIALCHAT_PORT", global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Wait for a peer to connect.
    Listen,
    /// Connect to a peer at `host:port`.
    Connect {
        address: String,
        /// Name of the peer; defaults to its bonded name or its address.
        #[arg(long)]
        peer_name: Option<String>,
    },
    /// Probe bonded peers and print the scanned and paired sets.
    Scan {
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
    /// Print the bonded peers.
    Paired,
    /// Bond a peer by writing it to the config file.
    Pair {
        #[arg(value_name = "NAME")]
        peer_name: String,
        address: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (mut cfg, config_note) = load(&cli)?;
    let file_cfg = cfg.clone();
    if let Some(name) = cli.name.clone() {
        cfg.node.display_name = Some(name);
    }
    if let Some(port) = cli.port {
        cfg.transport.port = port;
    }

    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.node.log_level)),
        )
        .init();
    if let Some(note) = config_note {
        warn!("{note}; using defaults");
    }

    let perms = ConfigPermissions::new(&cfg).snapshot();
    let adapter = Arc::new(TcpAdapter::new(TcpAdapterConfig::from_app_config(&cfg)));
    let controller = ChatController::with_permissions(adapter, perms);
    info!(
        "SerialChat starting as {}",
        cfg.node.display_name.as_deref().unwrap_or(serialchat_core::UNKNOWN_NAME)
    );

    match cli.command {
        Command::Listen => {
            let stream = controller.start_server(perms);
            chat(&controller, perms, stream).await?;
        }
        Command::Connect { address, peer_name } => {
            let peer = resolve_peer(&controller, address, peer_name);
            info!("connecting to {peer}");
            let stream = controller.connect_to_device(perms, peer);
            chat(&controller, perms, stream).await?;
        }
        Command::Scan { seconds } => {
            controller.start_discovery(perms);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
                _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
            }
            controller.stop_discovery(perms);
            print_devices("scanned", &controller.scanned_devices());
            print_devices("paired", &controller.paired_devices());
        }
        Command::Paired => print_devices("paired", &controller.paired_devices()),
        Command::Pair { peer_name, address } => {
            pair(cli.config.as_deref(), file_cfg, &peer_name, &address)?;
        }
    }

    controller.release();
    info!("SerialChat stopped");
    Ok(())
}

/// Loads the config named on the command line or the platform default.
///
/// A missing platform directory is not fatal; the returned note explains
/// why defaults are in use so it can be logged once tracing is up.
fn load(cli: &Cli) -> anyhow::Result<(AppConfig, Option<String>)> {
    match &cli.config {
        Some(path) => {
            let cfg = config::load_config_from(path)
                .with_context(|| format!("loading config from {}", path.display()))?;
            Ok((cfg, None))
        }
        None => match config::load_config() {
            Ok(cfg) => Ok((cfg, None)),
            Err(ConfigError::NoPlatformConfigDir) => Ok((
                AppConfig::default(),
                Some("no platform config directory".to_string()),
            )),
            Err(e) => Err(e).context("loading platform config"),
        },
    }
}

/// Adds `name` at `address` to the bonded peers and saves the file.  An
/// existing entry for the same address is renamed.
fn pair(path: Option<&Path>, mut cfg: AppConfig, name: &str, address: &str) -> anyhow::Result<()> {
    upsert_peer(&mut cfg, name, address);
    match path {
        Some(path) => config::save_config_to(&cfg, path)
            .with_context(|| format!("saving config to {}", path.display()))?,
        None => config::save_config(&cfg).context("saving platform config")?,
    }
    println!("paired {name} ({address})");
    Ok(())
}

fn upsert_peer(cfg: &mut AppConfig, name: &str, address: &str) {
    match cfg.peers.iter_mut().find(|p| p.address == address) {
        Some(entry) => entry.name = name.to_string(),
        None => cfg.peers.push(PeerEntry {
            name: name.to_string(),
            address: address.to_string(),
        }),
    }
}

fn resolve_peer(controller: &ChatController, address: String, name: Option<String>) -> PeerIdentity {
    if let Some(name) = name {
        return PeerIdentity::new(name, address);
    }
    controller
        .paired_devices()
        .into_iter()
        .find(|p| p.address() == address)
        .unwrap_or_else(|| PeerIdentity::new(address.clone(), address))
}

/// Relays stream events to stdout and stdin lines to the peer until the
/// stream ends or Ctrl-C.
async fn chat(
    controller: &ChatController,
    perms: Permissions,
    mut stream: ConnectionStream,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut errors = controller.subscribe_errors();

    loop {
        tokio::select! {
            event = stream.next() => match event {
                Some(ConnectionResult::Established) => println!("* connected"),
                Some(ConnectionResult::MessageReceived(msg)) => {
                    println!("{}: {}", msg.sender_name(), msg.text());
                }
                Some(ConnectionResult::Error(text)) => eprintln!("! {text}"),
                None => break,
            },
            line = lines.next_line(), if stdin_open => match line.context("reading stdin")? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    if controller.try_send_message(perms, &line).await.is_none() {
                        eprintln!("! not connected");
                    }
                }
                None => stdin_open = false,
            },
            Ok(text) = errors.recv() => eprintln!("! {text}"),
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }
    Ok(())
}

fn print_devices(label: &str, devices: &[PeerIdentity]) {
    println!("{label} ({}):", devices.len());
    for device in devices {
        println!("  {device}");
    }
}
