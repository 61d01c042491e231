//! Controller loop
//!
//! Monitoring and Scaling are sequential phases of [`Controller::run`]: the
//! monitoring interval lives inside [`Controller::monitor`] and is dropped
//! when that phase returns, so no reading is taken while a deployment is
//! being submitted or tracked.

use super::{
    ControllerPhase, ControllerStatus, DeploymentMutator, DeploymentTracker, ScaleDecisionEngine,
    TrackOutcome,
};
use crate::config::ControllerSettings;
use crate::error::{with_timeout, ScaleError, ScaleResult};
use crate::health::{components, HealthRegistry};
use crate::models::{AggregateReading, Decision};
use crate::observability::{FleetMetrics, StructuredLogger};
use crate::provisioning::{ProvisioningApi, TemplateCache};
use crate::store::{MetricAggregator, MetricStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// How a monitoring phase ended
enum MonitorExit {
    ScaleUp(AggregateReading),
    Shutdown,
}

pub struct Controller {
    resource_group: String,
    resource_type: String,
    target_node_count: u32,
    monitor_interval: Duration,
    cooldown: Duration,
    call_timeout: Duration,
    aggregator: MetricAggregator,
    engine: ScaleDecisionEngine,
    templates: TemplateCache,
    mutator: DeploymentMutator,
    tracker: DeploymentTracker,
    api: Arc<dyn ProvisioningApi>,
    status: ControllerStatus,
    health: HealthRegistry,
    metrics: FleetMetrics,
    logger: StructuredLogger,
}

impl Controller {
    /// Shared status handle for the API server
    pub fn status(&self) -> ControllerStatus {
        self.status.clone()
    }

    pub fn streak(&self) -> u32 {
        self.engine.streak()
    }

    /// Run until shutdown or the first error
    ///
    /// On error the controller is halted: its status and health are updated
    /// before the error is returned.
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) -> ScaleResult<()> {
        info!(
            resource_group = %self.resource_group,
            threshold_percent = self.engine.threshold(),
            trigger_count = self.engine.trigger_count(),
            target_node_count = self.target_node_count,
            monitor_interval_secs = self.monitor_interval.as_secs(),
            "Starting controller"
        );

        self.health.register(components::CONTROLLER).await;
        self.health.register(components::AGGREGATOR).await;
        self.health.register(components::DEPLOYMENT).await;
        self.status.set_phase(ControllerPhase::Starting).await;

        match self.run_phases(&mut shutdown).await {
            Ok(()) => {
                self.status.set_phase(ControllerPhase::Stopped).await;
                info!("Controller stopped");
                Ok(())
            }
            Err(e) => {
                self.halt(&e).await;
                Err(e)
            }
        }
    }

    async fn run_phases(&mut self, shutdown: &mut broadcast::Receiver<()>) -> ScaleResult<()> {
        self.templates.ensure().await?;

        loop {
            let reading = match self.monitor(shutdown).await? {
                MonitorExit::ScaleUp(reading) => reading,
                MonitorExit::Shutdown => return Ok(()),
            };

            match self.scale(&reading, shutdown).await? {
                TrackOutcome::Succeeded { .. } => {}
                TrackOutcome::Cancelled => return Ok(()),
            }

            if !self.cool_down(shutdown).await {
                return Ok(());
            }
        }
    }

    /// Take readings on a fresh interval until a scale-up is decided
    async fn monitor(&mut self, shutdown: &mut broadcast::Receiver<()>) -> ScaleResult<MonitorExit> {
        self.status.set_phase(ControllerPhase::Monitoring).await;

        let mut ticker = interval(self.monitor_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let (reading, decision) = self.observe().await?;
                    if decision == Decision::ScaleUp {
                        return Ok(MonitorExit::ScaleUp(reading));
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down controller");
                    return Ok(MonitorExit::Shutdown);
                }
            }
        }
    }

    /// One monitoring tick: aggregate, then feed the engine
    async fn observe(&mut self) -> ScaleResult<(AggregateReading, Decision)> {
        let (reading, samples) = match self.aggregator.read().await {
            Ok(read) => read,
            Err(e) => {
                if matches!(e, ScaleError::Store(_) | ScaleError::Timeout { .. }) {
                    self.metrics.inc_store_errors();
                }
                self.health
                    .set_unhealthy(components::AGGREGATOR, e.to_string())
                    .await;
                return Err(e);
            }
        };

        let decision = self.engine.observe(&reading);
        let streak = self.engine.streak();

        self.metrics.record_reading(&reading);
        self.metrics.set_streak(streak);
        self.status.record_reading(&reading, samples, streak).await;
        self.logger
            .log_fleet_reading(&reading, streak, self.engine.trigger_count());

        Ok((reading, decision))
    }

    /// Grow the fleet once and wait for the deployment to finish
    async fn scale(
        &mut self,
        reading: &AggregateReading,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> ScaleResult<TrackOutcome> {
        self.status.set_phase(ControllerPhase::Scaling).await;
        self.status.record_scale_up().await;
        self.metrics.inc_scale_ups();
        self.metrics.set_streak(0);
        self.logger
            .log_scale_up(reading, self.engine.threshold(), self.target_node_count);

        let resources = with_timeout(
            "list_resources",
            self.call_timeout,
            self.api
                .list_resources(&self.resource_group, &self.resource_type),
        )
        .await?;
        debug!(live_resources = resources.len(), "Counted live resources");

        let template = self.templates.load().await?;
        let resolved = self
            .mutator
            .mutate(&template, resources.len(), self.target_node_count)?;

        let mut record = self.tracker.submit(&resolved, &self.resource_group).await?;
        let outcome = self.tracker.track(&mut record, shutdown).await;
        self.status.finish_deployment(&record).await;

        match outcome {
            Ok(outcome) => {
                self.health.set_healthy(components::DEPLOYMENT).await;
                Ok(outcome)
            }
            Err(e) => {
                self.health
                    .set_unhealthy(components::DEPLOYMENT, e.to_string())
                    .await;
                Err(e)
            }
        }
    }

    /// Sleep out the cooldown; `false` when shutdown arrived first
    async fn cool_down(&mut self, shutdown: &mut broadcast::Receiver<()>) -> bool {
        self.status.set_phase(ControllerPhase::Cooldown).await;
        self.logger.log_cooldown(self.cooldown.as_secs());

        tokio::select! {
            _ = tokio::time::sleep(self.cooldown) => true,
            _ = shutdown.recv() => false,
        }
    }

    async fn halt(&self, err: &ScaleError) {
        self.status
            .set_phase(ControllerPhase::Halted {
                reason: err.to_string(),
            })
            .await;
        self.health
            .set_unhealthy(components::CONTROLLER, err.to_string())
            .await;
        self.logger.log_controller_halted(err);
    }
}

/// Builder for the controller
pub struct ControllerBuilder {
    settings: Option<ControllerSettings>,
    store: Option<Arc<dyn MetricStore>>,
    api: Option<Arc<dyn ProvisioningApi>>,
    health: Option<HealthRegistry>,
    metrics: Option<FleetMetrics>,
    logger: Option<StructuredLogger>,
}

impl ControllerBuilder {
    pub fn new() -> Self {
        Self {
            settings: None,
            store: None,
            api: None,
            health: None,
            metrics: None,
            logger: None,
        }
    }

    pub fn settings(mut self, settings: ControllerSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn store(mut self, store: Arc<dyn MetricStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn provisioning(mut self, api: Arc<dyn ProvisioningApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn metrics(mut self, metrics: FleetMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> ScaleResult<Controller> {
        let settings = self
            .settings
            .ok_or_else(|| ScaleError::Configuration("Settings are required".to_string()))?;
        let store = self
            .store
            .ok_or_else(|| ScaleError::Configuration("Metric store is required".to_string()))?;
        let api = self
            .api
            .ok_or_else(|| ScaleError::Configuration("Provisioning API is required".to_string()))?;

        let metrics = self.metrics.unwrap_or_default();
        let logger = self
            .logger
            .unwrap_or_else(|| StructuredLogger::new("controller", settings.resource_group.clone()));
        let status = ControllerStatus::new(
            settings.resource_group.clone(),
            settings.upper_threshold_percent,
            settings.trigger_count,
        );

        let tracker = DeploymentTracker::new(api.clone(), settings.poll_interval, settings.call_timeout)
            .with_logger(logger.clone())
            .with_metrics(metrics.clone())
            .with_status(status.clone());

        Ok(Controller {
            aggregator: MetricAggregator::new(
                store,
                settings.resource_group.clone(),
                settings.call_timeout,
            ),
            engine: ScaleDecisionEngine::new(settings.upper_threshold_percent, settings.trigger_count),
            templates: TemplateCache::new(
                api.clone(),
                settings.template.clone(),
                settings.resource_group.clone(),
                settings.target_node_count,
                settings.call_timeout,
            ),
            mutator: DeploymentMutator::from_settings(&settings.template),
            tracker,
            api,
            status,
            health: self.health.unwrap_or_default(),
            metrics,
            logger,
            resource_group: settings.resource_group,
            resource_type: settings.template.resource_type,
            target_node_count: settings.target_node_count,
            monitor_interval: settings.monitor_interval,
            cooldown: settings.cooldown,
            call_timeout: settings.call_timeout,
        })
    }
}

impl Default for ControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
