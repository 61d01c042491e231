//! fleetctl - operator CLI for the fleetscale autoscaler
//!
//! Reads controller status, samples and health from a running
//! `fleetscaled`, and replays utilization readings through the scale-up
//! rule offline.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{simulate, status};
use output::{print_error, OutputFormat};

/// Fleetscale operator CLI
#[derive(Parser)]
#[command(name = "fleetctl")]
#[command(author, version, about = "Operator CLI for the fleetscale autoscaler", long_about = None)]
pub struct Cli {
    /// Daemon API URL (falls back to ~/.config/fleetctl/config.json)
    #[arg(long, env = "FLEETCTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the controller's phase, streak and deployments
    Status,

    /// Show the per-node samples behind the last fleet reading
    Samples,

    /// Show daemon health and readiness
    Health,

    /// Replay readings through the scale-up rule without a fleet
    Simulate {
        /// Utilization threshold in percent
        #[arg(long)]
        threshold: f64,

        /// Consecutive overloaded readings that trigger a scale-up
        #[arg(long, default_value = "3")]
        trigger_count: u32,

        /// Fleet-average readings, in order
        #[arg(required = true, num_args = 1..)]
        readings: Vec<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load().unwrap_or_else(|e| {
        print_error(&format!("Ignoring config file: {:#}", e));
        config::Config::default()
    });

    let format = cli
        .format
        .or_else(|| {
            config
                .default_format
                .as_deref()
                .and_then(OutputFormat::from_name)
        })
        .unwrap_or_default();

    let api_url = config.resolve_api_url(cli.api_url);
    let connect = || client::ApiClient::new(&api_url);

    match cli.command {
        Commands::Status => status::show_status(&connect()?, format).await?,
        Commands::Samples => status::show_samples(&connect()?, format).await?,
        Commands::Health => status::show_health(&connect()?, format).await?,
        Commands::Simulate {
            threshold,
            trigger_count,
            readings,
        } => simulate::run(&readings, threshold, trigger_count, format)?,
    }

    Ok(())
}
