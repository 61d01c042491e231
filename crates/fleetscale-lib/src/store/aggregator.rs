//! Fleet-wide utilization aggregation

use super::MetricStore;
use crate::error::{with_timeout, ScaleError, ScaleResult};
use crate::models::{AggregateReading, UsageSample};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Reduce samples to their mean utilization
///
/// An empty set is an error, never `0` or `NaN`.
pub fn average(fleet_id: &str, samples: &[UsageSample]) -> ScaleResult<AggregateReading> {
    if samples.is_empty() {
        return Err(ScaleError::NoSamples {
            fleet_id: fleet_id.to_string(),
        });
    }

    let sum: f64 = samples.iter().map(|s| s.cpu_percent).sum();
    Ok(AggregateReading {
        fleet_id: fleet_id.to_string(),
        average_percent: sum / samples.len() as f64,
        sample_count: samples.len(),
        observed_at: Utc::now(),
    })
}

/// Reads the current samples of one fleet and averages them
pub struct MetricAggregator {
    store: Arc<dyn MetricStore>,
    fleet_id: String,
    call_timeout: Duration,
}

impl MetricAggregator {
    pub fn new(store: Arc<dyn MetricStore>, fleet_id: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            store,
            fleet_id: fleet_id.into(),
            call_timeout,
        }
    }

    pub fn fleet_id(&self) -> &str {
        &self.fleet_id
    }

    /// Read the fleet's samples and return them with their aggregate
    pub async fn read(&self) -> ScaleResult<(AggregateReading, Vec<UsageSample>)> {
        let samples = with_timeout(
            "list_samples",
            self.call_timeout,
            self.store.list_samples(&self.fleet_id),
        )
        .await?;

        let reading = average(&self.fleet_id, &samples)?;
        Ok((reading, samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryMetricStore;

    fn samples(values: &[f64]) -> Vec<UsageSample> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| UsageSample::new(format!("node-{}", i), "fleet", *v, Utc::now()).unwrap())
            .collect()
    }

    #[test]
    fn test_average_of_three() {
        let reading = average("fleet", &samples(&[10.0, 20.0, 30.0])).unwrap();
        assert_eq!(reading.average_percent, 20.0);
        assert_eq!(reading.sample_count, 3);
        assert_eq!(reading.fleet_id, "fleet");
    }

    #[test]
    fn test_average_of_empty_set_fails() {
        let result = average("fleet", &[]);
        assert!(matches!(result, Err(ScaleError::NoSamples { .. })));
    }

    #[test]
    fn test_average_single_sample() {
        let reading = average("fleet", &samples(&[73.5])).unwrap();
        assert_eq!(reading.average_percent, 73.5);
        assert_eq!(reading.sample_count, 1);
    }

    #[tokio::test]
    async fn test_aggregator_reads_store() {
        let store = Arc::new(InMemoryMetricStore::new());
        for sample in samples(&[40.0, 60.0]) {
            store.upsert(&sample).await.unwrap();
        }

        let aggregator = MetricAggregator::new(store, "fleet", Duration::from_secs(5));
        let (reading, read_samples) = aggregator.read().await.unwrap();

        assert_eq!(reading.average_percent, 50.0);
        assert_eq!(read_samples.len(), 2);
    }

    #[tokio::test]
    async fn test_aggregator_empty_fleet() {
        let store = Arc::new(InMemoryMetricStore::new());
        let aggregator = MetricAggregator::new(store, "empty-fleet", Duration::from_secs(5));

        let err = aggregator.read().await.unwrap_err();
        assert_eq!(err.to_string(), "no usage samples recorded for fleet empty-fleet");
    }
}
