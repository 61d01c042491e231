//! Observability for reporters and the controller
//!
//! Provides:
//! - Prometheus metrics (sampling latency, node and fleet utilization, streak, deployments)
//! - Structured JSON logging with tracing

use crate::error::ScaleError;
use crate::models::{AggregateReading, DeploymentRecord, UsageSample};
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_gauge, Gauge,
    Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for one sampling window (in seconds)
///
/// A sample spans the configured delay between counter snapshots, so the
/// buckets start around the default 5s delay.
const SAMPLING_BUCKETS: &[f64] = &[0.5, 1.0, 2.5, 5.0, 5.5, 6.0, 7.5, 10.0, 15.0, 30.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<FleetMetricsInner> = OnceLock::new();

struct FleetMetricsInner {
    sampling_latency_seconds: Histogram,
    node_cpu_percent: Gauge,
    samples_published: IntCounter,
    fleet_average_percent: Gauge,
    fleet_sample_count: IntGauge,
    overload_streak: IntGauge,
    scale_ups: IntCounter,
    deployment_polls: IntCounter,
    deployment_failures: IntCounter,
    store_errors: IntCounter,
}

impl FleetMetricsInner {
    fn new() -> Self {
        Self {
            sampling_latency_seconds: register_histogram!(
                "fleetscale_sampling_latency_seconds",
                "Time spent taking one CPU utilization sample",
                SAMPLING_BUCKETS.to_vec()
            )
            .expect("Failed to register sampling_latency_seconds"),

            node_cpu_percent: register_gauge!(
                "fleetscale_node_cpu_percent",
                "Most recent CPU utilization sampled on this node"
            )
            .expect("Failed to register node_cpu_percent"),

            samples_published: register_int_counter!(
                "fleetscale_samples_published_total",
                "Usage samples upserted into the metric store"
            )
            .expect("Failed to register samples_published"),

            fleet_average_percent: register_gauge!(
                "fleetscale_fleet_average_percent",
                "Most recent fleet-wide average CPU utilization"
            )
            .expect("Failed to register fleet_average_percent"),

            fleet_sample_count: register_int_gauge!(
                "fleetscale_fleet_sample_count",
                "Number of node samples in the most recent fleet reading"
            )
            .expect("Failed to register fleet_sample_count"),

            overload_streak: register_int_gauge!(
                "fleetscale_overload_streak",
                "Current overload streak of the decision engine"
            )
            .expect("Failed to register overload_streak"),

            scale_ups: register_int_counter!(
                "fleetscale_scale_ups_total",
                "Scale-up decisions taken by the controller"
            )
            .expect("Failed to register scale_ups"),

            deployment_polls: register_int_counter!(
                "fleetscale_deployment_polls_total",
                "Provisioning state polls for tracked deployments"
            )
            .expect("Failed to register deployment_polls"),

            deployment_failures: register_int_counter!(
                "fleetscale_deployment_failures_total",
                "Deployments that ended in a failure or unexpected state"
            )
            .expect("Failed to register deployment_failures"),

            store_errors: register_int_counter!(
                "fleetscale_store_errors_total",
                "Failed metric store reads and writes"
            )
            .expect("Failed to register store_errors"),
        }
    }
}

/// Fleet metrics for Prometheus exposition
///
/// Lightweight handle to the process-wide metrics; clones share them.
#[derive(Clone)]
pub struct FleetMetrics {
    inner: &'static FleetMetricsInner,
}

impl Default for FleetMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl FleetMetrics {
    /// Create a metrics handle, registering the metrics on first use
    pub fn new() -> Self {
        Self {
            inner: GLOBAL_METRICS.get_or_init(FleetMetricsInner::new),
        }
    }

    pub fn observe_sampling_latency(&self, duration_secs: f64) {
        self.inner.sampling_latency_seconds.observe(duration_secs);
    }

    /// Record a sample successfully published from this node
    pub fn record_published(&self, cpu_percent: f64) {
        self.inner.node_cpu_percent.set(cpu_percent);
        self.inner.samples_published.inc();
    }

    pub fn record_reading(&self, reading: &AggregateReading) {
        self.inner.fleet_average_percent.set(reading.average_percent);
        self.inner.fleet_sample_count.set(reading.sample_count as i64);
    }

    pub fn set_streak(&self, streak: u32) {
        self.inner.overload_streak.set(i64::from(streak));
    }

    pub fn inc_scale_ups(&self) {
        self.inner.scale_ups.inc();
    }

    pub fn inc_deployment_polls(&self) {
        self.inner.deployment_polls.inc();
    }

    pub fn inc_deployment_failures(&self) {
        self.inner.deployment_failures.inc();
    }

    pub fn inc_store_errors(&self) {
        self.inner.store_errors.inc();
    }

    pub fn scale_ups(&self) -> u64 {
        self.inner.scale_ups.get()
    }

    pub fn samples_published(&self) -> u64 {
        self.inner.samples_published.get()
    }
}

/// Structured logger for fleetscale events
///
/// Every event carries the emitting role and node so that reporter and
/// controller logs can be merged.
#[derive(Clone)]
pub struct StructuredLogger {
    role: String,
    node_name: String,
}

impl StructuredLogger {
    pub fn new(role: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            node_name: node_name.into(),
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn log_startup(&self, version: &str, resource_group: &str) {
        info!(
            event = "fleetscale_started",
            role = %self.role,
            node = %self.node_name,
            version = %version,
            resource_group = %resource_group,
            "fleetscale started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "fleetscale_shutdown",
            role = %self.role,
            node = %self.node_name,
            reason = %reason,
            "fleetscale shutting down"
        );
    }

    pub fn log_usage_published(&self, sample: &UsageSample) {
        info!(
            event = "usage_published",
            role = %self.role,
            node = %self.node_name,
            fleet_id = %sample.fleet_id,
            cpu_percent = sample.cpu_percent,
            "Published CPU usage sample"
        );
    }

    pub fn log_fleet_reading(&self, reading: &AggregateReading, streak: u32, trigger_count: u32) {
        info!(
            event = "fleet_reading",
            role = %self.role,
            node = %self.node_name,
            fleet_id = %reading.fleet_id,
            average_percent = reading.average_percent,
            sample_count = reading.sample_count,
            streak = streak,
            trigger_count = trigger_count,
            "Fleet utilization observed"
        );
    }

    pub fn log_scale_up(&self, reading: &AggregateReading, threshold: f64, target_node_count: u32) {
        warn!(
            event = "scale_up_triggered",
            role = %self.role,
            node = %self.node_name,
            fleet_id = %reading.fleet_id,
            average_percent = reading.average_percent,
            threshold_percent = threshold,
            target_node_count = target_node_count,
            "Sustained overload, scaling up"
        );
    }

    pub fn log_deployment_submitted(&self, record: &DeploymentRecord, next_index: u32) {
        info!(
            event = "deployment_submitted",
            role = %self.role,
            node = %self.node_name,
            deployment = %record.deployment_name,
            resource_group = %record.resource_group,
            template_digest = %record.template_digest,
            next_index = next_index,
            "Deployment submitted"
        );
    }

    pub fn log_deployment_status(&self, record: &DeploymentRecord) {
        info!(
            event = "deployment_status",
            role = %self.role,
            node = %self.node_name,
            deployment = %record.deployment_name,
            state = %record.state,
            provisioning_state = ?record.last_provisioning_state,
            polls = record.polls,
            "Deployment polled"
        );
    }

    pub fn log_deployment_succeeded(&self, record: &DeploymentRecord, elapsed_secs: i64) {
        info!(
            event = "deployment_succeeded",
            role = %self.role,
            node = %self.node_name,
            deployment = %record.deployment_name,
            polls = record.polls,
            elapsed_secs = elapsed_secs,
            "Deployment succeeded"
        );
    }

    pub fn log_cooldown(&self, cooldown_secs: u64) {
        info!(
            event = "cooldown_started",
            role = %self.role,
            node = %self.node_name,
            cooldown_secs = cooldown_secs,
            "Cooling down before monitoring resumes"
        );
    }

    pub fn log_controller_halted(&self, err: &ScaleError) {
        error!(
            event = "controller_halted",
            role = %self.role,
            node = %self.node_name,
            error_kind = err.kind(),
            error = %err,
            "Controller halted"
        );
    }

    pub fn log_reporter_halted(&self, err: &ScaleError) {
        error!(
            event = "reporter_halted",
            role = %self.role,
            node = %self.node_name,
            error_kind = err.kind(),
            error = %err,
            "Reporter halted"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_fleet_metrics_creation() {
        let metrics = FleetMetrics::new();

        metrics.observe_sampling_latency(5.01);
        metrics.set_streak(2);
        metrics.inc_deployment_polls();
        metrics.inc_deployment_failures();
        metrics.inc_store_errors();
        metrics.record_reading(&AggregateReading {
            fleet_id: "fleet".to_string(),
            average_percent: 42.0,
            sample_count: 3,
            observed_at: Utc::now(),
        });
    }

    #[test]
    fn test_counters_are_shared_between_handles() {
        let first = FleetMetrics::new();
        let second = first.clone();

        let before = second.samples_published();
        first.record_published(12.5);
        assert!(second.samples_published() >= before + 1);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("controller", "coord-0");
        assert_eq!(logger.role(), "controller");
        assert_eq!(logger.node_name, "coord-0");
    }
}
