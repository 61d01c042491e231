//! Integration tests for per-node reporting
//!
//! These tests use a mock `/proc/stat` and in-memory stores to run the
//! sampler, publisher and loop without touching the host's counters.

#[cfg(test)]
mod mock_proc_stat_tests {
    use crate::reporter::{CpuCounterSource, ProcStatSource, UsageSampler};
    use crate::error::ScaleError;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::fs;

    const STAT: &str = "cpu  4705 150 1120 16250 520 0 35 0 0 0
cpu0 2350 75 560 8125 260 0 17 0 0 0
cpu1 2355 75 560 8125 260 0 18 0 0 0
intr 114930548 113199788 3 0 5 263 0 4 [... lots more numbers ...]
ctxt 1990473
btime 1062191376
processes 2915
procs_running 1
procs_blocked 0
";

    #[tokio::test]
    async fn test_proc_stat_source_reads_aggregate_line() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stat");
        fs::write(&path, STAT).await.unwrap();

        let ticks = ProcStatSource::with_path(&path).read().await.unwrap();
        assert_eq!(ticks.user, 4705);
        assert_eq!(ticks.nice, 150);
        assert_eq!(ticks.system, 1120);
        assert_eq!(ticks.idle, 16250);
    }

    #[tokio::test]
    async fn test_proc_stat_source_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let source = ProcStatSource::with_path(temp_dir.path().join("missing"));

        let result = source.read().await;
        assert!(matches!(result, Err(ScaleError::SamplingFault(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_over_static_file_is_a_fault() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stat");
        fs::write(&path, STAT).await.unwrap();

        // Counters that never move give a zero total delta
        let sampler = UsageSampler::new(
            Arc::new(ProcStatSource::with_path(&path)),
            Duration::from_secs(5),
        );
        let result = sampler.sample().await;
        assert!(matches!(result, Err(ScaleError::SamplingFault(_))));
    }
}

#[cfg(test)]
mod node_identity_tests {
    use crate::reporter::resolve_node_id_from;
    use tempfile::TempDir;
    use tokio::fs;

    #[tokio::test]
    async fn test_host_vm_takes_precedence() {
        let temp_dir = TempDir::new().unwrap();
        let id = resolve_node_id_from(
            Some("worker-7\n".to_string()),
            Some("node-name".to_string()),
            &temp_dir.path().join("hostname"),
        )
        .await
        .unwrap();
        assert_eq!(id, "worker-7");
    }

    #[tokio::test]
    async fn test_blank_env_falls_through() {
        let temp_dir = TempDir::new().unwrap();
        let id = resolve_node_id_from(
            Some("  \r\n".to_string()),
            Some("node-3".to_string()),
            &temp_dir.path().join("hostname"),
        )
        .await
        .unwrap();
        assert_eq!(id, "node-3");
    }

    #[tokio::test]
    async fn test_kernel_hostname_fallback() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("hostname");
        fs::write(&path, "swarm-slave-2\n").await.unwrap();

        let id = resolve_node_id_from(None, None, &path).await.unwrap();
        assert_eq!(id, "swarm-slave-2");
    }

    #[tokio::test]
    async fn test_no_identity_available() {
        let temp_dir = TempDir::new().unwrap();
        let result = resolve_node_id_from(None, None, &temp_dir.path().join("hostname")).await;
        assert!(result.is_err());
    }
}

#[cfg(test)]
mod reporter_loop_tests {
    use crate::error::{ScaleError, ScaleResult};
    use crate::health::{components, ComponentStatus, HealthRegistry};
    use crate::models::UsageSample;
    use crate::reporter::{CpuCounterSource, CpuTicks, MetricPublisher, ReporterLoopBuilder, UsageSampler};
    use crate::store::{InMemoryMetricStore, MetricStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::broadcast;

    /// Advances 3 busy and 7 idle ticks per read, i.e. 30% utilization
    struct SteadySource {
        reads: AtomicU64,
    }

    impl SteadySource {
        fn new() -> Self {
            Self {
                reads: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl CpuCounterSource for SteadySource {
        async fn read(&self) -> ScaleResult<CpuTicks> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(CpuTicks::new(100 + 3 * n, 0, 0, 1000 + 7 * n))
        }
    }

    /// Store whose writes always fail
    struct FailingStore;

    #[async_trait]
    impl MetricStore for FailingStore {
        async fn upsert(&self, _sample: &UsageSample) -> ScaleResult<()> {
            Err(ScaleError::Store("table unavailable".to_string()))
        }

        async fn list_samples(&self, _fleet_id: &str) -> ScaleResult<Vec<UsageSample>> {
            Ok(vec![])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_publishes_every_interval() {
        let source = Arc::new(SteadySource::new());
        let store = Arc::new(InMemoryMetricStore::new());
        let health = HealthRegistry::new();

        let reporter = ReporterLoopBuilder::new()
            .sampler(UsageSampler::new(source.clone(), Duration::from_secs(5)))
            .publisher(MetricPublisher::new(
                store.clone(),
                "rg-prod",
                "node-1",
                Duration::from_secs(5),
            ))
            .health(health.clone())
            .interval(Duration::from_secs(30))
            .build()
            .unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(reporter.run(shutdown_rx));

        // Ticks at 0s and 30s, each finishing 5s later
        tokio::time::sleep(Duration::from_secs(50)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(source.reads.load(Ordering::SeqCst), 4);

        let samples = store.list_samples("rg-prod").await.unwrap();
        assert_eq!(samples.len(), 1);
        assert!((samples[0].cpu_percent - 30.0).abs() < 1e-9);

        let sampler = health.component(components::SAMPLER).await.unwrap();
        assert_eq!(sampler.status, ComponentStatus::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_halts_on_store_error() {
        let health = HealthRegistry::new();
        let reporter = ReporterLoopBuilder::new()
            .sampler(UsageSampler::new(
                Arc::new(SteadySource::new()),
                Duration::from_secs(5),
            ))
            .publisher(MetricPublisher::new(
                Arc::new(FailingStore),
                "rg-prod",
                "node-1",
                Duration::from_secs(5),
            ))
            .health(health.clone())
            .build()
            .unwrap();

        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let err = reporter.run(shutdown_rx).await.unwrap_err();

        assert!(matches!(err, ScaleError::Store(_)));
        let publisher = health.component(components::PUBLISHER).await.unwrap();
        assert_eq!(publisher.status, ComponentStatus::Unhealthy);
    }
}
