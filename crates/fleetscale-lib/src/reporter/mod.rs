//! Per-node CPU reporting
//!
//! A reporter samples the node's cumulative CPU tick counters twice with a
//! fixed delay in between, turns the difference into a utilization
//! percentage and upserts it into the shared metric store.

mod r#loop;
mod proc_stat;
mod publisher;
mod sampler;

#[cfg(test)]
mod tests;

pub use proc_stat::ProcStatSource;
pub use publisher::MetricPublisher;
pub use r#loop::{ReporterConfig, ReporterLoop, ReporterLoopBuilder};
pub use sampler::{compute_usage, UsageSampler};

use crate::error::{ScaleError, ScaleResult};
use async_trait::async_trait;
use std::path::Path;

/// Cumulative CPU tick counters for the whole node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTicks {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
}

impl CpuTicks {
    pub fn new(user: u64, nice: u64, system: u64, idle: u64) -> Self {
        Self {
            user,
            nice,
            system,
            idle,
        }
    }

    /// Ticks spent doing work
    pub fn busy(&self) -> u64 {
        self.user + self.nice + self.system
    }

    /// Busy plus idle ticks
    pub fn total(&self) -> u64 {
        self.busy() + self.idle
    }
}

/// Source of cumulative CPU tick counters
#[async_trait]
pub trait CpuCounterSource: Send + Sync {
    /// Read the current counters
    async fn read(&self) -> ScaleResult<CpuTicks>;
}

/// Resolve this node's identity in the metric store
///
/// `HOST_VM` wins, then `NODE_NAME`, then the kernel hostname.
pub async fn resolve_node_id() -> ScaleResult<String> {
    resolve_node_id_from(
        std::env::var("HOST_VM").ok(),
        std::env::var("NODE_NAME").ok(),
        Path::new("/proc/sys/kernel/hostname"),
    )
    .await
}

pub(crate) async fn resolve_node_id_from(
    host_vm: Option<String>,
    node_name: Option<String>,
    hostname_path: &Path,
) -> ScaleResult<String> {
    let from_env = [host_vm, node_name]
        .into_iter()
        .flatten()
        .map(|v| clean_host(&v))
        .find(|v| !v.is_empty());

    if let Some(id) = from_env {
        return Ok(id);
    }

    let content = tokio::fs::read_to_string(hostname_path).await.map_err(|e| {
        ScaleError::Configuration(format!(
            "could not determine node identity from {}: {}",
            hostname_path.display(),
            e
        ))
    })?;

    let host = clean_host(&content);
    if host.is_empty() {
        return Err(ScaleError::Configuration(
            "node hostname is empty".to_string(),
        ));
    }
    Ok(host)
}

fn clean_host(raw: &str) -> String {
    raw.replace(['\n', '\r'], "").trim().to_string()
}
