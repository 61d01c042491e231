//! Two-phase CPU utilization sampling

use super::{CpuCounterSource, CpuTicks};
use crate::error::{ScaleError, ScaleResult};
use crate::models::validate_percent;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Utilization between two counter snapshots, in percent
///
/// `100 * (busy_after - busy_before) / (total_after - total_before)` where
/// busy is user + nice + system and total adds idle. Counters that did not
/// advance or went backwards are a sampling fault.
pub fn compute_usage(before: &CpuTicks, after: &CpuTicks) -> ScaleResult<f64> {
    let total_delta = after.total().checked_sub(before.total()).ok_or_else(|| {
        ScaleError::SamplingFault("cpu counters went backwards between snapshots".to_string())
    })?;

    if total_delta == 0 {
        return Err(ScaleError::SamplingFault(
            "cpu counters did not advance between snapshots".to_string(),
        ));
    }

    let busy_delta = after.busy().checked_sub(before.busy()).ok_or_else(|| {
        ScaleError::SamplingFault("busy counters went backwards between snapshots".to_string())
    })?;

    let usage = 100.0 * busy_delta as f64 / total_delta as f64;
    validate_percent(usage)?;
    Ok(usage)
}

/// Samples local CPU utilization over a fixed window
pub struct UsageSampler {
    source: Arc<dyn CpuCounterSource>,
    delay: Duration,
}

impl UsageSampler {
    pub fn new(source: Arc<dyn CpuCounterSource>, delay: Duration) -> Self {
        Self { source, delay }
    }

    /// Delay between the two snapshots
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Snapshot, wait, snapshot, and compute utilization
    pub async fn sample(&self) -> ScaleResult<f64> {
        let before = self.source.read().await?;
        tokio::time::sleep(self.delay).await;
        let after = self.source.read().await?;

        let usage = compute_usage(&before, &after)?;
        debug!(
            busy_delta = after.busy().saturating_sub(before.busy()),
            total_delta = after.total().saturating_sub(before.total()),
            usage_percent = usage,
            "Computed CPU utilization"
        );
        Ok(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns queued snapshots in order
    struct ScriptedSource {
        snapshots: Mutex<Vec<CpuTicks>>,
    }

    impl ScriptedSource {
        fn new(mut snapshots: Vec<CpuTicks>) -> Self {
            snapshots.reverse();
            Self {
                snapshots: Mutex::new(snapshots),
            }
        }
    }

    #[async_trait]
    impl CpuCounterSource for ScriptedSource {
        async fn read(&self) -> ScaleResult<CpuTicks> {
            self.snapshots
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| ScaleError::SamplingFault("script exhausted".to_string()))
        }
    }

    #[test]
    fn test_compute_usage_reference_values() {
        let before = CpuTicks::new(10, 5, 5, 80);
        let after = CpuTicks::new(20, 10, 10, 90);

        // busy 20 -> 40, total 100 -> 130
        let usage = compute_usage(&before, &after).unwrap();
        assert!((usage - 200.0 / 3.0).abs() < 1e-9, "got {}", usage);
    }

    #[test]
    fn test_compute_usage_fully_idle() {
        let before = CpuTicks::new(10, 0, 10, 100);
        let after = CpuTicks::new(10, 0, 10, 200);
        assert_eq!(compute_usage(&before, &after).unwrap(), 0.0);
    }

    #[test]
    fn test_compute_usage_fully_busy() {
        let before = CpuTicks::new(10, 0, 10, 100);
        let after = CpuTicks::new(60, 0, 60, 100);
        assert_eq!(compute_usage(&before, &after).unwrap(), 100.0);
    }

    #[test]
    fn test_compute_usage_no_ticks_elapsed() {
        let ticks = CpuTicks::new(10, 5, 5, 80);
        let result = compute_usage(&ticks, &ticks);
        assert!(matches!(result, Err(ScaleError::SamplingFault(_))));
    }

    #[test]
    fn test_compute_usage_counter_reset() {
        let before = CpuTicks::new(1000, 0, 1000, 5000);
        let after = CpuTicks::new(10, 0, 10, 50);
        assert!(matches!(
            compute_usage(&before, &after),
            Err(ScaleError::SamplingFault(_))
        ));
    }

    #[test]
    fn test_compute_usage_idle_went_backwards() {
        // total advances but busy exceeds it: idle dropped, which is a fault
        let before = CpuTicks::new(0, 0, 0, 100);
        let after = CpuTicks::new(150, 0, 0, 0);
        assert!(compute_usage(&before, &after).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_waits_between_snapshots() {
        let source = Arc::new(ScriptedSource::new(vec![
            CpuTicks::new(10, 5, 5, 80),
            CpuTicks::new(20, 10, 10, 90),
        ]));
        let sampler = UsageSampler::new(source, Duration::from_secs(5));

        let start = tokio::time::Instant::now();
        let usage = sampler.sample().await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!((usage - 66.666_666).abs() < 1e-3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_propagates_read_failure() {
        let source = Arc::new(ScriptedSource::new(vec![CpuTicks::new(1, 1, 1, 1)]));
        let sampler = UsageSampler::new(source, Duration::from_secs(5));

        assert!(matches!(
            sampler.sample().await,
            Err(ScaleError::SamplingFault(_))
        ));
    }
}
