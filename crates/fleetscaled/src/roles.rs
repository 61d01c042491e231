//! Role wiring
//!
//! Builds the collaborators of the selected role from the validated
//! settings and spawns its loop.

use anyhow::Result;
use clap::ValueEnum;
use fleetscale_lib::{
    config::{FleetConfig, StoreSettings},
    error::ScaleResult,
    health::HealthRegistry,
    observability::{FleetMetrics, StructuredLogger},
    provisioning::{ArmClient, CachingTokenIssuer, ClientCredentialsIssuer, TokenIssuer},
    reporter::{resolve_node_id, MetricPublisher, ProcStatSource, ReporterLoopBuilder, UsageSampler},
    scaling::{ControllerBuilder, ControllerStatus},
    store::{InMemoryMetricStore, MetricStore, TableMetricStore},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// Watches fleet utilization and scales out
    #[value(alias = "agent")]
    Controller,
    /// Samples and publishes this node's CPU utilization
    #[value(alias = "client")]
    Reporter,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Controller => "controller",
            Role::Reporter => "reporter",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// Process-local store, for single-host setups
    Memory,
    /// Shared table service
    Table,
}

/// A spawned role loop
pub struct RoleHandle {
    pub status: Option<ControllerStatus>,
    pub task: JoinHandle<ScaleResult<()>>,
}

/// Node identity used in logs; falls back to the role name
pub async fn node_name(role: Role) -> String {
    resolve_node_id()
        .await
        .unwrap_or_else(|_| role.as_str().to_string())
}

fn build_store(
    kind: StoreKind,
    settings: &StoreSettings,
    timeout: Duration,
) -> Result<Arc<dyn MetricStore>> {
    let store: Arc<dyn MetricStore> = match kind {
        StoreKind::Memory => Arc::new(InMemoryMetricStore::new()),
        StoreKind::Table => Arc::new(TableMetricStore::new(settings, timeout)?),
    };
    info!(store = ?kind, table = %settings.table_name, "Metric store configured");
    Ok(store)
}

pub fn start_controller(
    config: &FleetConfig,
    store: StoreKind,
    health: HealthRegistry,
    metrics: FleetMetrics,
    logger: StructuredLogger,
    shutdown: broadcast::Receiver<()>,
) -> Result<RoleHandle> {
    let settings = config.controller_settings()?;
    let store = build_store(store, &settings.store, settings.call_timeout)?;

    let mut tokens: Arc<dyn TokenIssuer> = Arc::new(ClientCredentialsIssuer::new(
        &settings.authority_endpoint,
        &settings.tenant,
        &settings.client_id,
        &settings.client_secret,
        settings.call_timeout,
    )?);
    if settings.cache_tokens {
        tokens = Arc::new(CachingTokenIssuer::new(tokens));
    }

    let api = Arc::new(ArmClient::new(
        &settings.management_endpoint,
        &settings.subscription_id,
        tokens,
        settings.call_timeout,
    )?);

    let mut controller = ControllerBuilder::new()
        .settings(settings)
        .store(store)
        .provisioning(api)
        .health(health)
        .metrics(metrics)
        .logger(logger)
        .build()?;

    let status = controller.status();
    let task = tokio::spawn(async move { controller.run(shutdown).await });

    Ok(RoleHandle {
        status: Some(status),
        task,
    })
}

pub async fn start_reporter(
    config: &FleetConfig,
    store: StoreKind,
    health: HealthRegistry,
    metrics: FleetMetrics,
    logger: StructuredLogger,
    shutdown: broadcast::Receiver<()>,
) -> Result<RoleHandle> {
    let settings = config.reporter_settings()?;
    let store = build_store(store, &settings.store, settings.call_timeout)?;
    let node_id = resolve_node_id().await?;

    let reporter = ReporterLoopBuilder::new()
        .sampler(UsageSampler::new(
            Arc::new(ProcStatSource::new()),
            settings.sample_delay,
        ))
        .publisher(MetricPublisher::new(
            store,
            settings.resource_group,
            node_id,
            settings.call_timeout,
        ))
        .interval(settings.publish_interval)
        .health(health)
        .metrics(metrics)
        .logger(logger)
        .build()?;

    Ok(RoleHandle {
        status: None,
        task: tokio::spawn(reporter.run(shutdown)),
    })
}
