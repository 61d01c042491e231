//! fleetscaled - fleet CPU autoscaler
//!
//! Runs either as the controller, which watches the fleet-wide average
//! CPU utilization and submits scale-out deployments, or as a reporter on
//! every worker node, publishing that node's utilization.

use anyhow::{bail, Result};
use clap::Parser;
use fleetscale_lib::{
    health::HealthRegistry,
    observability::{FleetMetrics, StructuredLogger},
};
use roles::{Role, StoreKind};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod roles;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "fleetscaled")]
#[command(about = "Scale a VM fleet out when its average CPU utilization stays high")]
#[command(version)]
struct Args {
    /// Role to run
    #[arg(value_enum)]
    role: Role,

    /// Resource group holding the fleet
    resource_group: String,

    /// Configuration document path or http(s) URL
    #[arg(long, env = "FLEETSCALE_CONFIG", default_value = "fleetscale.json")]
    config: String,

    /// Port for the health and metrics API
    #[arg(long, default_value = "8080")]
    api_port: u16,

    /// Metric store backend
    #[arg(long, value_enum, default_value = "table")]
    store: StoreKind,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let args = Args::parse();
    info!(role = args.role.as_str(), "Starting fleetscaled");

    let config = config::load(&args.config, &args.resource_group).await?;

    let health_registry = HealthRegistry::new();
    let metrics = FleetMetrics::new();

    let logger = StructuredLogger::new(args.role.as_str(), roles::node_name(args.role).await);
    logger.log_startup(VERSION, &args.resource_group);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let role = match args.role {
        Role::Controller => roles::start_controller(
            &config,
            args.store,
            health_registry.clone(),
            metrics.clone(),
            logger.clone(),
            shutdown_rx,
        )?,
        Role::Reporter => {
            roles::start_reporter(
                &config,
                args.store,
                health_registry.clone(),
                metrics.clone(),
                logger.clone(),
                shutdown_rx,
            )
            .await?
        }
    };

    let mut app_state = api::AppState::new(health_registry.clone(), metrics);
    if let Some(status) = role.status.clone() {
        app_state = app_state.with_status(status);
    }

    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(args.api_port, Arc::new(app_state)));

    let mut task = role.task;
    tokio::select! {
        joined = &mut task => {
            let outcome = match joined {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(anyhow::Error::from(e)),
                Err(e) => Err(anyhow::Error::from(e)),
            };
            if let Err(e) = &outcome {
                // Keep /healthz and /status up so the halt stays observable
                error!(error = %e, "Role stopped; serving status until interrupted");
                tokio::signal::ctrl_c().await?;
            }
            logger.log_shutdown("role stopped");
            api_handle.abort();
            outcome
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutting down");
            let _ = shutdown_tx.send(());
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Role stopped with an error during shutdown"),
                Err(e) => bail!("role task failed: {}", e),
            }
            logger.log_shutdown("SIGINT received");
            api_handle.abort();
            Ok(())
        }
    }
}
