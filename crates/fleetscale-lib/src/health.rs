//! Component health for the fleetscale daemon
//!
//! Each role registers the components it drives (sampler and publisher for
//! a reporter; aggregator, deployment and controller for the controller).
//! A component is healthy until its loop hits an error, and stays
//! unhealthy afterwards: no loop resumes after an error, so there is no
//! intermediate state to report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Unhealthy,
}

/// Last recorded state of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    /// Error that made the component unhealthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the status last changed
    pub since: DateTime<Utc>,
}

impl ComponentHealth {
    fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            since: Utc::now(),
        }
    }

    fn unhealthy(message: String) -> Self {
        Self {
            status: ComponentStatus::Unhealthy,
            message: Some(message),
            since: Utc::now(),
        }
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const SAMPLER: &str = "sampler";
    pub const PUBLISHER: &str = "publisher";
    pub const AGGREGATOR: &str = "aggregator";
    pub const CONTROLLER: &str = "controller";
    pub const DEPLOYMENT: &str = "deployment";
}

#[derive(Debug, Default)]
struct RegistryState {
    started: bool,
    components: BTreeMap<String, ComponentHealth>,
}

impl RegistryState {
    fn first_unhealthy(&self) -> Option<(&String, &ComponentHealth)> {
        self.components
            .iter()
            .find(|(_, c)| c.status == ComponentStatus::Unhealthy)
    }
}

/// Shared component health, cloned into every loop and the API server
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `name`, starting healthy
    pub async fn register(&self, name: &str) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), ComponentHealth::healthy());
    }

    pub async fn set_healthy(&self, name: &str) {
        let mut state = self.state.write().await;
        let unchanged = state
            .components
            .get(name)
            .is_some_and(|c| c.status == ComponentStatus::Healthy);
        if !unchanged {
            state
                .components
                .insert(name.to_string(), ComponentHealth::healthy());
        }
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), ComponentHealth::unhealthy(message.into()));
    }

    /// Mark the role as started; `/readyz` answers 503 until then
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.started = ready;
    }

    pub async fn component(&self, name: &str) -> Option<ComponentHealth> {
        self.state.read().await.components.get(name).cloned()
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = match state.first_unhealthy() {
            Some(_) => ComponentStatus::Unhealthy,
            None => ComponentStatus::Healthy,
        };
        HealthResponse {
            status,
            components: state.components.clone(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        let reason = if !state.started {
            Some("Role not yet started".to_string())
        } else {
            state.first_unhealthy().map(|(name, component)| {
                format!(
                    "{} unhealthy: {}",
                    name,
                    component.message.as_deref().unwrap_or("no detail")
                )
            })
        };
        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}
