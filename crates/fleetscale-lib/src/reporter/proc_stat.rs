//! `/proc/stat` counter source
//!
//! Reads the aggregate `cpu` line:
//! `cpu  user nice system idle iowait irq softirq ...`
//! Only the first four counters take part in the utilization formula.

use super::{CpuCounterSource, CpuTicks};
use crate::error::{ScaleError, ScaleResult};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;

/// Counter source backed by the kernel's `/proc/stat`
pub struct ProcStatSource {
    path: PathBuf,
}

impl ProcStatSource {
    pub fn new() -> Self {
        Self {
            path: PathBuf::from("/proc/stat"),
        }
    }

    /// Create source with custom stat file path (for testing)
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse the aggregate cpu line out of `/proc/stat` contents
    pub fn parse_stat(content: &str) -> ScaleResult<CpuTicks> {
        let line = content
            .lines()
            .find(|l| l.split_whitespace().next() == Some("cpu"))
            .ok_or_else(|| ScaleError::SamplingFault("no aggregate cpu line in stat".to_string()))?;

        let fields: Vec<&str> = line.split_whitespace().skip(1).take(4).collect();
        if fields.len() < 4 {
            return Err(ScaleError::SamplingFault(format!(
                "cpu line has {} counters, expected at least 4",
                fields.len()
            )));
        }

        let mut counters = [0u64; 4];
        for (slot, raw) in counters.iter_mut().zip(&fields) {
            *slot = raw.parse().map_err(|_| {
                ScaleError::SamplingFault(format!("cpu counter '{}' is not an integer", raw))
            })?;
        }

        Ok(CpuTicks::new(counters[0], counters[1], counters[2], counters[3]))
    }
}

impl Default for ProcStatSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CpuCounterSource for ProcStatSource {
    async fn read(&self) -> ScaleResult<CpuTicks> {
        let content = fs::read_to_string(&self.path).await.map_err(|e| {
            ScaleError::SamplingFault(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        Self::parse_stat(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stat() {
        let content = "cpu  4705 356 584 3699176 23060 0 277 0 0 0
cpu0 1393 280 249 925462 4900 0 230 0 0 0
intr 1462898 27 0 0
ctxt 2393843";

        let ticks = ProcStatSource::parse_stat(content).unwrap();
        assert_eq!(ticks, CpuTicks::new(4705, 356, 584, 3699176));
        assert_eq!(ticks.busy(), 5645);
        assert_eq!(ticks.total(), 3704821);
    }

    #[test]
    fn test_parse_stat_skips_per_core_lines() {
        let content = "cpu0 1 2 3 4\ncpu  10 5 5 80\n";
        let ticks = ProcStatSource::parse_stat(content).unwrap();
        assert_eq!(ticks, CpuTicks::new(10, 5, 5, 80));
    }

    #[test]
    fn test_parse_stat_missing_line() {
        let result = ProcStatSource::parse_stat("intr 1 2 3\n");
        assert!(matches!(result, Err(ScaleError::SamplingFault(_))));
    }

    #[test]
    fn test_parse_stat_short_line() {
        let result = ProcStatSource::parse_stat("cpu 10 5\n");
        assert!(matches!(result, Err(ScaleError::SamplingFault(_))));
    }

    #[test]
    fn test_parse_stat_garbage_counter() {
        let result = ProcStatSource::parse_stat("cpu 10 five 5 80\n");
        assert!(matches!(result, Err(ScaleError::SamplingFault(_))));
    }
}
