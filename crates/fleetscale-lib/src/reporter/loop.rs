//! Reporter loop
//!
//! Periodically samples local CPU utilization and publishes it. The first
//! error stops the ticker and is returned to the caller.

use super::{MetricPublisher, UsageSampler};
use crate::error::{ScaleError, ScaleResult};
use crate::health::{components, HealthRegistry};
use crate::models::UsageSample;
use crate::observability::{FleetMetrics, StructuredLogger};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Configuration for the reporter loop
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Time between the starts of two samples (default: 30 seconds)
    pub interval: Duration,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

/// Samples and publishes this node's utilization on a fixed interval
pub struct ReporterLoop {
    sampler: UsageSampler,
    publisher: MetricPublisher,
    config: ReporterConfig,
    health: HealthRegistry,
    metrics: FleetMetrics,
    logger: StructuredLogger,
}

impl ReporterLoop {
    /// Run until shutdown or the first sampling/publishing error
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> ScaleResult<()> {
        info!(
            interval_secs = self.config.interval.as_secs(),
            delay_secs = self.sampler.delay().as_secs(),
            node_id = %self.publisher.node_id(),
            fleet_id = %self.publisher.fleet_id(),
            "Starting reporter loop"
        );

        self.health.register(components::SAMPLER).await;
        self.health.register(components::PUBLISHER).await;

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        self.logger.log_reporter_halted(&e);
                        return Err(e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down reporter loop");
                    return Ok(());
                }
            }
        }
    }

    /// One sample-then-publish cycle
    pub(crate) async fn tick(&self) -> ScaleResult<UsageSample> {
        let start = Instant::now();
        let usage = match self.sampler.sample().await {
            Ok(usage) => usage,
            Err(e) => {
                self.health
                    .set_unhealthy(components::SAMPLER, e.to_string())
                    .await;
                return Err(e);
            }
        };
        self.metrics
            .observe_sampling_latency(start.elapsed().as_secs_f64());

        let sample = match self.publisher.publish(usage).await {
            Ok(sample) => sample,
            Err(e) => {
                if matches!(e, ScaleError::Store(_) | ScaleError::Timeout { .. }) {
                    self.metrics.inc_store_errors();
                }
                self.health
                    .set_unhealthy(components::PUBLISHER, e.to_string())
                    .await;
                return Err(e);
            }
        };

        self.metrics.record_published(sample.cpu_percent);
        self.logger.log_usage_published(&sample);
        debug!(observed_at = %sample.observed_at, "Reporter cycle complete");
        Ok(sample)
    }
}

/// Builder for the reporter loop
pub struct ReporterLoopBuilder {
    sampler: Option<UsageSampler>,
    publisher: Option<MetricPublisher>,
    health: Option<HealthRegistry>,
    metrics: Option<FleetMetrics>,
    logger: Option<StructuredLogger>,
    config: ReporterConfig,
}

impl ReporterLoopBuilder {
    pub fn new() -> Self {
        Self {
            sampler: None,
            publisher: None,
            health: None,
            metrics: None,
            logger: None,
            config: ReporterConfig::default(),
        }
    }

    pub fn sampler(mut self, sampler: UsageSampler) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn publisher(mut self, publisher: MetricPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Share a health registry with the API server
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

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn build(self) -> ScaleResult<ReporterLoop> {
        let sampler = self
            .sampler
            .ok_or_else(|| ScaleError::Configuration("Sampler is required".to_string()))?;
        let publisher = self
            .publisher
            .ok_or_else(|| ScaleError::Configuration("Publisher is required".to_string()))?;
        if self.config.interval.is_zero() {
            return Err(ScaleError::Configuration(
                "reporter interval must be greater than zero".to_string(),
            ));
        }

        let logger = self
            .logger
            .unwrap_or_else(|| StructuredLogger::new("reporter", publisher.node_id()));

        Ok(ReporterLoop {
            sampler,
            publisher,
            config: self.config,
            health: self.health.unwrap_or_default(),
            metrics: self.metrics.unwrap_or_default(),
            logger,
        })
    }
}

impl Default for ReporterLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
