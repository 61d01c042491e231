//! Core data models for reporters and the controller

use crate::error::{ScaleError, ScaleResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latest CPU utilization of one node, as stored in the metric store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    pub node_id: String,
    pub fleet_id: String,
    pub cpu_percent: f64,
    pub observed_at: DateTime<Utc>,
}

impl UsageSample {
    /// Build a sample, rejecting utilization outside `0..=100`
    pub fn new(
        node_id: impl Into<String>,
        fleet_id: impl Into<String>,
        cpu_percent: f64,
        observed_at: DateTime<Utc>,
    ) -> ScaleResult<Self> {
        validate_percent(cpu_percent)?;
        Ok(Self {
            node_id: node_id.into(),
            fleet_id: fleet_id.into(),
            cpu_percent,
            observed_at,
        })
    }
}

/// Check that a utilization value is a finite percentage
pub fn validate_percent(cpu_percent: f64) -> ScaleResult<()> {
    if cpu_percent.is_finite() && (0.0..=100.0).contains(&cpu_percent) {
        Ok(())
    } else {
        Err(ScaleError::SamplingFault(format!(
            "cpu utilization {} is outside 0..=100",
            cpu_percent
        )))
    }
}

/// Fleet-wide average computed from all current samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateReading {
    pub fleet_id: String,
    pub average_percent: f64,
    pub sample_count: usize,
    pub observed_at: DateTime<Utc>,
}

/// Output of the hysteresis engine for one reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Hold,
    ScaleUp,
}

/// Lifecycle of a scale-up deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentState {
    Submitted,
    Running,
    Succeeded,
    Failed,
}

impl DeploymentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentState::Succeeded | DeploymentState::Failed)
    }
}

impl std::fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentState::Submitted => write!(f, "submitted"),
            DeploymentState::Running => write!(f, "running"),
            DeploymentState::Succeeded => write!(f, "succeeded"),
            DeploymentState::Failed => write!(f, "failed"),
        }
    }
}

/// One scale-up attempt, from submission to a terminal state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployment_name: String,
    pub resource_group: String,
    pub submitted_at: DateTime<Utc>,
    pub state: DeploymentState,
    /// Number of status polls performed since submission
    pub polls: u32,
    /// Raw provisioning state from the last poll
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_provisioning_state: Option<String>,
    pub template_digest: String,
}
