//! HTTP API for health checks, Prometheus metrics and controller status

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use fleetscale_lib::{
    health::{ComponentStatus, HealthRegistry},
    observability::FleetMetrics,
    scaling::ControllerStatus,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: FleetMetrics,
    /// Present only in the controller role
    pub status: Option<ControllerStatus>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, metrics: FleetMetrics) -> Self {
        Self {
            health_registry,
            metrics,
            status: None,
        }
    }

    pub fn with_status(mut self, status: ControllerStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

fn not_controller() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "status is only served by the controller role"})),
    )
        .into_response()
}

/// Controller phase, streak, last reading and deployments
async fn status(State(state): State<Arc<AppState>>) -> Response {
    match &state.status {
        Some(status) => Json(status.snapshot().await).into_response(),
        None => not_controller(),
    }
}

/// Per-node samples behind the last fleet reading
async fn samples(State(state): State<Arc<AppState>>) -> Response {
    match &state.status {
        Some(status) => Json(status.snapshot().await.last_samples).into_response(),
        None => not_controller(),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .route("/samples", get(samples))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
