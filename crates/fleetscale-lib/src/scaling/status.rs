//! Read-only controller status shared with the API server

use crate::models::{AggregateReading, DeploymentRecord, UsageSample};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Where the controller is in its lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ControllerPhase {
    Starting,
    Monitoring,
    Scaling,
    Cooldown,
    Halted { reason: String },
    Stopped,
}

impl std::fmt::Display for ControllerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerPhase::Starting => write!(f, "starting"),
            ControllerPhase::Monitoring => write!(f, "monitoring"),
            ControllerPhase::Scaling => write!(f, "scaling"),
            ControllerPhase::Cooldown => write!(f, "cooldown"),
            ControllerPhase::Halted { .. } => write!(f, "halted"),
            ControllerPhase::Stopped => write!(f, "stopped"),
        }
    }
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(flatten)]
    pub phase: ControllerPhase,
    pub resource_group: String,
    pub threshold_percent: f64,
    pub trigger_count: u32,
    pub streak: u32,
    pub last_reading: Option<AggregateReading>,
    #[serde(default)]
    pub last_samples: Vec<UsageSample>,
    pub active_deployment: Option<DeploymentRecord>,
    pub last_deployment: Option<DeploymentRecord>,
    pub scale_ups: u64,
    pub updated_at: DateTime<Utc>,
}

/// Shared handle to the controller's status
#[derive(Debug, Clone)]
pub struct ControllerStatus {
    inner: Arc<RwLock<StatusSnapshot>>,
}

impl ControllerStatus {
    pub fn new(resource_group: impl Into<String>, threshold_percent: f64, trigger_count: u32) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StatusSnapshot {
                phase: ControllerPhase::Starting,
                resource_group: resource_group.into(),
                threshold_percent,
                trigger_count,
                streak: 0,
                last_reading: None,
                last_samples: Vec::new(),
                active_deployment: None,
                last_deployment: None,
                scale_ups: 0,
                updated_at: Utc::now(),
            })),
        }
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        self.inner.read().await.clone()
    }

    pub async fn phase(&self) -> ControllerPhase {
        self.inner.read().await.phase.clone()
    }

    pub async fn set_phase(&self, phase: ControllerPhase) {
        let mut status = self.inner.write().await;
        status.phase = phase;
        status.updated_at = Utc::now();
    }

    pub async fn record_reading(
        &self,
        reading: &AggregateReading,
        samples: Vec<UsageSample>,
        streak: u32,
    ) {
        let mut status = self.inner.write().await;
        status.last_reading = Some(reading.clone());
        status.last_samples = samples;
        status.streak = streak;
        status.updated_at = Utc::now();
    }

    pub async fn record_scale_up(&self) {
        let mut status = self.inner.write().await;
        status.scale_ups += 1;
        status.streak = 0;
        status.updated_at = Utc::now();
    }

    /// Publish the state of the in-flight deployment
    pub async fn track_deployment(&self, record: &DeploymentRecord) {
        let mut status = self.inner.write().await;
        status.active_deployment = Some(record.clone());
        status.updated_at = Utc::now();
    }

    /// Move the in-flight deployment to `last_deployment`
    pub async fn finish_deployment(&self, record: &DeploymentRecord) {
        let mut status = self.inner.write().await;
        status.active_deployment = None;
        status.last_deployment = Some(record.clone());
        status.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_serialization() {
        let halted = ControllerPhase::Halted {
            reason: "deployment Deployment-1 failed".to_string(),
        };
        let value = serde_json::to_value(&halted).unwrap();
        assert_eq!(value["phase"], "halted");
        assert_eq!(value["reason"], "deployment Deployment-1 failed");
        assert_eq!(halted.to_string(), "halted");
    }

    #[tokio::test]
    async fn test_snapshot_round_trips_through_json() {
        let status = ControllerStatus::new("rg-prod", 80.0, 3);
        status.set_phase(ControllerPhase::Monitoring).await;

        let json = serde_json::to_string(&status.snapshot().await).unwrap();
        assert!(json.contains(r#""phase":"monitoring""#));

        let parsed: StatusSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.phase, ControllerPhase::Monitoring);
        assert_eq!(parsed.resource_group, "rg-prod");
    }

    #[tokio::test]
    async fn test_scale_up_resets_streak() {
        let status = ControllerStatus::new("rg-prod", 80.0, 3);
        let reading = AggregateReading {
            fleet_id: "rg-prod".to_string(),
            average_percent: 91.0,
            sample_count: 2,
            observed_at: Utc::now(),
        };
        status.record_reading(&reading, vec![], 2).await;
        status.record_scale_up().await;

        let snapshot = status.snapshot().await;
        assert_eq!(snapshot.streak, 0);
        assert_eq!(snapshot.scale_ups, 1);
        assert_eq!(snapshot.last_reading.unwrap().average_percent, 91.0);
    }
}
