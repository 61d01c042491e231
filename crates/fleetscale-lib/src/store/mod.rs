//! Shared metric store
//!
//! Samples are partitioned by fleet and keyed by node, so one partition
//! query returns the latest sample of every node in a fleet. Upserts
//! replace the previous sample; no history is kept.

mod aggregator;
mod memory;
mod table;

pub use aggregator::{average, MetricAggregator};
pub use memory::InMemoryMetricStore;
pub use table::{shared_key_signature, TableMetricStore};

use crate::error::ScaleResult;
use crate::models::UsageSample;
use async_trait::async_trait;

/// Storage for the latest per-node usage samples
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Insert or replace the sample for `(sample.fleet_id, sample.node_id)`
    async fn upsert(&self, sample: &UsageSample) -> ScaleResult<()>;

    /// All current samples for a fleet
    async fn list_samples(&self, fleet_id: &str) -> ScaleResult<Vec<UsageSample>>;
}
