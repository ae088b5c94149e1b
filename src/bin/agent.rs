//! Fleet telemetry agent: registers this drone, then streams simulated telemetry.

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use skyview::agent::{AgentClient, AgentConfig, AgentMode, TelemetrySimulator, AGENT_VERSION};

#[derive(Parser, Debug)]
#[command(author, version, about = "DRONEX telemetry agent")]
struct Args {
    /// Path to config.json, config.yaml or config.toml
    #[arg(long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("skyview=info")),
        )
        .init();

    let args = Args::parse();
    let config = match AgentConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            return Err(e.into());
        }
    };

    info!("Starting DRONEX agent {}", AGENT_VERSION);
    info!("DRONE_ID: {}", config.drone_id);
    info!("MODE: {}", config.mode.as_str());

    let client = AgentClient::new(config)?;

    tokio::select! {
        res = run(&client) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Agent stopped");
            Ok(())
        }
    }
}

async fn run(client: &AgentClient) -> Result<()> {
    client.register().await;

    match client.config().mode {
        AgentMode::Simulation => {
            client.telemetry_loop(TelemetrySimulator::new()).await;
            Ok(())
        }
        AgentMode::Mavlink => {
            error!("MAVLINK mode is not implemented yet; use SIMULATION");
            Err(eyre!("unsupported mode MAVLINK"))
        }
    }
}
