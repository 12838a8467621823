//! Veil VPN CLI
//!
//! A command-line frontend for the Veil VPN daemon.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use veil_daemon::{
    Config, Daemon, DaemonEvent, NullTunnelProvider, StaticRelayListFetcher,
};
use veil_types::device::{AccountAndDevice, Device};
use veil_types::relay_list::RelayList;

/// Veil VPN daemon
#[derive(Parser)]
#[command(name = "veil")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "veil.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run {
        /// Path to a relay list snapshot (JSON)
        #[arg(short, long)]
        relay_list: Option<PathBuf>,

        /// Account number to log in with; connects immediately when set
        #[arg(short, long)]
        account: Option<String>,
    },

    /// Generate a sample configuration file
    GenConfig {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "veil.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            relay_list,
            account,
        } => run(cli.config, relay_list, account).await,
        Commands::GenConfig { output } => generate_config(output),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(
    config_path: PathBuf,
    relay_list_path: Option<PathBuf>,
    account: Option<String>,
) -> Result<()> {
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {config_path:?}"))?;
    init_logging(&config.daemon.log_level);
    info!("Configuration loaded from {:?}", config_path);

    let relay_list = match relay_list_path {
        Some(path) => load_relay_list(&path)?,
        None => RelayList::default(),
    };
    info!("Relay list holds {} relays", relay_list.relays().count());

    let daemon = Daemon::start(
        config,
        Arc::new(NullTunnelProvider),
        Box::new(StaticRelayListFetcher),
        relay_list,
    )
    .context("Failed to start daemon")?;

    // Log every daemon event until the stream closes
    let mut events = daemon.subscribe();
    let event_logger = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                DaemonEvent::TunnelState(state) => info!("tunnel state: {state}"),
                DaemonEvent::Settings(_) => info!("settings changed"),
                DaemonEvent::RelayList(list) => {
                    info!("relay list updated ({} relays)", list.relays().count())
                }
                DaemonEvent::AppVersionInfo(version) => {
                    info!("app version info: supported={}", version.supported)
                }
                DaemonEvent::Device(event) => info!("device state: {}", event.new_state),
                DaemonEvent::RemoveDevice(event) => {
                    info!("device removed: {}", event.removed_device.name)
                }
            }
        }
    });

    if let Some(account) = account {
        daemon.login(AccountAndDevice {
            account,
            device: Device {
                id: "veil-cli".to_owned(),
                name: "veil-cli".to_owned(),
                pubkey: String::new(),
            },
        });
        daemon.connect().context("Failed to connect")?;
    }

    wait_for_shutdown().await;

    info!("Shutting down daemon...");
    daemon.shutdown().await;
    event_logger.abort();

    Ok(())
}

fn load_relay_list(path: &PathBuf) -> Result<RelayList> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read relay list from {path:?}"))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse relay list from {path:?}"))
}

fn generate_config(output: PathBuf) -> Result<()> {
    let sample = Config::sample();

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write configuration to {output:?}"))?;

    println!("Sample configuration written to {output:?}");

    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to register SIGTERM handler");
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .expect("Failed to register SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C");
    }
}
