//! Deployment submission and tracking
//!
//! A deployment moves `Submitted -> Running -> Succeeded | Failed`. The
//! provisioning service reports `Accepted` and `Running` while work is in
//! progress; any state outside the known set ends tracking with an error.

use super::{ControllerStatus, ResolvedTemplate};
use crate::error::{with_timeout, ScaleError, ScaleResult};
use crate::models::{DeploymentRecord, DeploymentState};
use crate::observability::{FleetMetrics, StructuredLogger};
use crate::provisioning::ProvisioningApi;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Status of a deployment after one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentStatus {
    Running,
    Succeeded,
    Failed,
}

/// How tracking ended without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    Succeeded { polls: u32 },
    Cancelled,
}

/// Map a raw provisioning state onto the tracked lifecycle
pub fn map_provisioning_state(
    deployment_name: &str,
    provisioning_state: &str,
) -> ScaleResult<DeploymentStatus> {
    match provisioning_state {
        "Running" | "Accepted" => Ok(DeploymentStatus::Running),
        "Succeeded" => Ok(DeploymentStatus::Succeeded),
        "Failed" => Ok(DeploymentStatus::Failed),
        other => Err(ScaleError::UnexpectedState {
            deployment_name: deployment_name.to_string(),
            state: other.to_string(),
        }),
    }
}

/// Generate a fresh deployment name
pub fn deployment_name() -> String {
    format!("Deployment-{}", uuid::Uuid::new_v4())
}

pub struct DeploymentTracker {
    api: Arc<dyn ProvisioningApi>,
    poll_interval: Duration,
    call_timeout: Duration,
    metrics: FleetMetrics,
    logger: StructuredLogger,
    status: Option<ControllerStatus>,
}

impl DeploymentTracker {
    pub fn new(api: Arc<dyn ProvisioningApi>, poll_interval: Duration, call_timeout: Duration) -> Self {
        Self {
            api,
            poll_interval,
            call_timeout,
            metrics: FleetMetrics::new(),
            logger: StructuredLogger::new("controller", "local"),
            status: None,
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_metrics(mut self, metrics: FleetMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Publish every poll to a shared status handle
    pub fn with_status(mut self, status: ControllerStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Validate and submit a resolved template
    pub async fn submit(
        &self,
        resolved: &ResolvedTemplate,
        resource_group: &str,
    ) -> ScaleResult<DeploymentRecord> {
        resolved.validate()?;

        let name = deployment_name();
        let result = with_timeout(
            "submit_deployment",
            self.call_timeout,
            self.api.submit_deployment(resource_group, &name, resolved),
        )
        .await?;

        let record = DeploymentRecord {
            deployment_name: result.deployment_name,
            resource_group: resource_group.to_string(),
            submitted_at: Utc::now(),
            state: DeploymentState::Submitted,
            polls: 0,
            last_provisioning_state: result.provisioning_state,
            template_digest: resolved.digest().to_string(),
        };

        self.logger
            .log_deployment_submitted(&record, resolved.next_index());
        if let Some(status) = &self.status {
            status.track_deployment(&record).await;
        }
        Ok(record)
    }

    /// Query the deployment once and fold the answer into the record
    pub async fn poll(&self, record: &mut DeploymentRecord) -> ScaleResult<DeploymentStatus> {
        let raw = with_timeout(
            "get_deployment",
            self.call_timeout,
            self.api
                .get_deployment(&record.resource_group, &record.deployment_name),
        )
        .await?;

        record.polls += 1;
        self.metrics.inc_deployment_polls();

        let mapped = map_provisioning_state(&record.deployment_name, &raw);
        record.last_provisioning_state = Some(raw);
        let status = match mapped {
            Ok(status) => status,
            Err(e) => {
                record.state = DeploymentState::Failed;
                self.metrics.inc_deployment_failures();
                self.logger.log_deployment_status(record);
                if let Some(shared) = &self.status {
                    shared.track_deployment(record).await;
                }
                return Err(e);
            }
        };

        record.state = match status {
            DeploymentStatus::Running => DeploymentState::Running,
            DeploymentStatus::Succeeded => DeploymentState::Succeeded,
            DeploymentStatus::Failed => DeploymentState::Failed,
        };

        self.logger.log_deployment_status(record);
        if let Some(shared) = &self.status {
            shared.track_deployment(record).await;
        }
        Ok(status)
    }

    /// Poll until the deployment reaches a terminal state
    ///
    /// The first poll happens one interval after the call.
    pub async fn track(
        &self,
        record: &mut DeploymentRecord,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> ScaleResult<TrackOutcome> {
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.poll(record).await? {
                        DeploymentStatus::Running => {
                            debug!(
                                deployment = %record.deployment_name,
                                polls = record.polls,
                                "Deployment still in progress"
                            );
                        }
                        DeploymentStatus::Succeeded => {
                            let elapsed = (Utc::now() - record.submitted_at).num_seconds();
                            self.logger.log_deployment_succeeded(record, elapsed);
                            return Ok(TrackOutcome::Succeeded { polls: record.polls });
                        }
                        DeploymentStatus::Failed => {
                            self.metrics.inc_deployment_failures();
                            return Err(ScaleError::DeploymentFailed {
                                deployment_name: record.deployment_name.clone(),
                            });
                        }
                    }
                }
                _ = shutdown.recv() => {
                    return Ok(TrackOutcome::Cancelled);
                }
            }
        }
    }
}
