//! KNX Fleet Server - Main Entry Point

use clap::{Parser, Subcommand};
use knx_fleet_rust::logging::{init_logging, LogConfig};
use knx_fleet_rust::mock::MockNetwork;
use knx_fleet_rust::server::{build_state, serve};
use knx_fleet_rust::{Result, ServerConfig};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Command line arguments
#[derive(Parser)]
#[command(name = "knx-fleet-server")]
#[command(about = "KNX gateway fleet server with live device-state streaming")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "KNX_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP/WebSocket server
    Serve {
        /// Override the configured HTTP port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Validate the configuration file and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = init_logging(LogConfig::from_env()) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let config = match ServerConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Serve { port } => {
            let mut config = config;
            if let Some(port) = port {
                config.http.port = port;
            }
            run_server(config).await
        }
        Commands::CheckConfig => {
            info!(
                rooms = config.rooms.len(),
                port = config.http.port,
                "configuration OK"
            );
            Ok(())
        }
    }
}

async fn run_server(config: ServerConfig) -> Result<()> {
    match &config.auth.token {
        Some(_) => info!("WebSocket authentication enabled"),
        None => warn!("WebSocket authentication disabled; set auth.token or KNX_AUTH_TOKEN"),
    }

    // The simulator network is the only transport shipped with the binary;
    // embedders inject a real tunnel transport through `server::build_state`.
    if config.gateway.simulate {
        info!("running against simulated gateways");
    } else {
        warn!("no tunnel transport is built in; falling back to simulated gateways");
    }
    let network = MockNetwork::new();
    let state = build_state(&config, network.factory());

    if !config.rooms.is_empty() {
        let summary = state
            .orchestrator
            .apply_configuration(config.rooms.clone())
            .await;
        info!(
            configured = summary.configured,
            failed = summary.failed_rooms.len(),
            "startup configuration applied"
        );
    }

    serve(&config, state).await
}
