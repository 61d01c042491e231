//! Fleet autoscaling library
//!
//! This crate provides the core functionality for:
//! - Per-node CPU sampling and publishing (reporter role)
//! - Fleet-wide aggregation and hysteresis-based scale-up decisions
//! - Deployment template caching, mutation and tracking (controller role)
//! - Health checks and observability

pub mod config;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod provisioning;
pub mod reporter;
pub mod scaling;
pub mod store;

pub use config::{ControllerSettings, FleetConfig, ReporterSettings, StoreSettings};
pub use error::{ScaleError, ScaleResult};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{FleetMetrics, StructuredLogger};
