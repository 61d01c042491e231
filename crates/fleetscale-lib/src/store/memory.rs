//! In-process metric store

use super::MetricStore;
use crate::error::ScaleResult;
use crate::models::UsageSample;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

/// Metric store held in memory, keyed by `(fleet_id, node_id)`
///
/// Useful when the controller and its reporters share one process, and as
/// the store in tests.
#[derive(Debug, Default)]
pub struct InMemoryMetricStore {
    samples: DashMap<(String, String), UsageSample>,
}

impl InMemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored samples across all fleets
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drop a node's sample
    pub fn remove(&self, fleet_id: &str, node_id: &str) -> Option<UsageSample> {
        self.samples
            .remove(&(fleet_id.to_string(), node_id.to_string()))
            .map(|(_, v)| v)
    }
}

#[async_trait]
impl MetricStore for InMemoryMetricStore {
    async fn upsert(&self, sample: &UsageSample) -> ScaleResult<()> {
        debug!(
            fleet_id = %sample.fleet_id,
            node_id = %sample.node_id,
            cpu_percent = sample.cpu_percent,
            "Upserting usage sample"
        );
        self.samples.insert(
            (sample.fleet_id.clone(), sample.node_id.clone()),
            sample.clone(),
        );
        Ok(())
    }

    async fn list_samples(&self, fleet_id: &str) -> ScaleResult<Vec<UsageSample>> {
        let mut samples: Vec<UsageSample> = self
            .samples
            .iter()
            .filter(|entry| entry.key().0 == fleet_id)
            .map(|entry| entry.value().clone())
            .collect();
        samples.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(samples)
    }
}
