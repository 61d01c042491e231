//! Publishing usage samples to the metric store

use crate::error::{with_timeout, ScaleResult};
use crate::models::UsageSample;
use crate::store::MetricStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Upserts this node's utilization under its fleet partition
pub struct MetricPublisher {
    store: Arc<dyn MetricStore>,
    fleet_id: String,
    node_id: String,
    call_timeout: Duration,
}

impl MetricPublisher {
    pub fn new(
        store: Arc<dyn MetricStore>,
        fleet_id: impl Into<String>,
        node_id: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            fleet_id: fleet_id.into(),
            node_id: node_id.into(),
            call_timeout,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn fleet_id(&self) -> &str {
        &self.fleet_id
    }

    /// Validate and upsert one utilization value
    pub async fn publish(&self, cpu_percent: f64) -> ScaleResult<UsageSample> {
        let sample = UsageSample::new(&self.node_id, &self.fleet_id, cpu_percent, Utc::now())?;
        with_timeout("upsert_sample", self.call_timeout, self.store.upsert(&sample)).await?;
        Ok(sample)
    }
}
