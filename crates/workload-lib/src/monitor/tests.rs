//! Integration tests for host monitoring
//!
//! These tests use a mock proc filesystem and a scripted probe to exercise
//! sampling, rate computation and alerting without depending on the host.

#[cfg(test)]
mod mock_procfs_tests {
    use crate::monitor::{ProcfsProbe, ResourceProbe};
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::fs;

    /// Helper to create a mock /proc tree
    async fn create_mock_proc(temp_dir: &TempDir, idle: u64) -> PathBuf {
        let proc_root = temp_dir.path().to_path_buf();
        fs::create_dir_all(proc_root.join("net")).await.unwrap();
        fs::create_dir_all(proc_root.join("self")).await.unwrap();

        let stat = format!(
            "cpu  300 0 100 {} 0 0 0 0 0 0\ncpu0 150 0 50 {} 0 0 0 0 0 0\nintr 12345\n",
            idle,
            idle / 2
        );
        fs::write(proc_root.join("stat"), stat).await.unwrap();

        fs::write(proc_root.join("loadavg"), "0.52 0.41 0.30 2/345 6789\n")
            .await
            .unwrap();

        let cpuinfo = r#"processor	: 0
cpu MHz		: 2400.000
processor	: 1
cpu MHz		: 2600.000
"#;
        fs::write(proc_root.join("cpuinfo"), cpuinfo).await.unwrap();

        let meminfo = r#"MemTotal:        8000000 kB
MemFree:         1000000 kB
MemAvailable:    2000000 kB
Buffers:          100000 kB
"#;
        fs::write(proc_root.join("meminfo"), meminfo).await.unwrap();

        let net_dev = r#"Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 999999 9999 0 0 0 0 0 0 999999 9999 0 0 0 0 0 0
  eth0: 10240 100 1 0 0 0 0 0 20480 200 2 0 0 0 0 0
"#;
        fs::write(proc_root.join("net/dev"), net_dev).await.unwrap();

        let diskstats = r#"   8       0 sda 100 0 2000 0 50 0 1000 0 0 0 0
   8       1 sda1 100 0 2000 0 50 0 1000 0 0 0 0
"#;
        fs::write(proc_root.join("diskstats"), diskstats)
            .await
            .unwrap();

        fs::write(
            proc_root.join("self/stat"),
            "77 (workload-agent) S 1 77 77 0 -1 0 0 0 0 0 300 100 0 0 20 0 4 0 1 0 0\n",
        )
        .await
        .unwrap();
        fs::write(
            proc_root.join("self/status"),
            "Name:\tworkload-agent\nVmRSS:\t   2048 kB\nThreads:\t6\n",
        )
        .await
        .unwrap();

        proc_root
    }

    #[tokio::test]
    async fn test_procfs_sample() {
        let temp_dir = TempDir::new().unwrap();
        let proc_root = create_mock_proc(&temp_dir, 600).await;
        let probe = ProcfsProbe::with_proc_root(&proc_root);

        let sample = probe.sample().await.unwrap();

        assert_eq!(sample.cpu.idle, 600);
        assert_eq!(sample.cpu.total, 1000);
        assert_eq!(sample.load_average, [0.52, 0.41, 0.30]);
        assert!((sample.frequency_mhz - 2500.0).abs() < 1e-9);
        assert!((sample.memory.percentage - 75.0).abs() < 1e-9);

        // Loopback is ignored
        assert_eq!(sample.net.rx_bytes, 10240);
        assert_eq!(sample.net.tx_bytes, 20480);
        assert_eq!(sample.net.errors, 3);

        // Partition counters are not double counted
        assert_eq!(sample.disk_io.bytes_read, 2000 * 512);
        assert_eq!(sample.disk_io.reads_completed, 100);

        assert_eq!(sample.process.memory_rss_bytes, 2048 * 1024);
        assert_eq!(sample.process.thread_count, 6);
        assert!((sample.process.cpu_time_secs - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_optional_files_may_be_missing() {
        let temp_dir = TempDir::new().unwrap();
        let proc_root = create_mock_proc(&temp_dir, 600).await;
        fs::remove_file(proc_root.join("net/dev")).await.unwrap();
        fs::remove_file(proc_root.join("cpuinfo")).await.unwrap();

        let probe = ProcfsProbe::with_proc_root(&proc_root);
        let sample = probe.sample().await.unwrap();

        assert_eq!(sample.net.rx_bytes, 0);
        assert_eq!(sample.frequency_mhz, 0.0);
    }

    #[tokio::test]
    async fn test_missing_stat_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let proc_root = create_mock_proc(&temp_dir, 600).await;
        fs::remove_file(proc_root.join("stat")).await.unwrap();

        let probe = ProcfsProbe::with_proc_root(&proc_root);
        let err = probe.sample().await.unwrap_err();
        assert!(err.to_string().contains("stat"));
    }
}

#[cfg(test)]
mod monitor_tests {
    use crate::config::MonitorConfig;
    use crate::health::{components, ComponentStatus, HealthRegistry};
    use crate::models::Trend;
    use crate::monitor::{
        build_snapshot, CpuTimes, DiskCapacity, MonitorEvent, NetCounters, RawSample,
        ScriptedProbe, SystemMonitor,
    };
    use crate::observability::StructuredLogger;
    use chrono::{Duration, Utc};
    use std::sync::Arc;
    use std::time::Instant;

    fn monitor_with(probe: ScriptedProbe) -> SystemMonitor {
        SystemMonitor::new(MonitorConfig::default(), Arc::new(probe)).unwrap()
    }

    #[test]
    fn test_rates_from_consecutive_samples() {
        let earlier = RawSample {
            cpu: CpuTimes {
                idle: 500,
                total: 1000,
            },
            net: NetCounters {
                rx_bytes: 1000,
                tx_bytes: 500,
                ..Default::default()
            },
            ..Default::default()
        };
        let later = RawSample {
            cpu: CpuTimes {
                idle: 600,
                total: 1400,
            },
            net: NetCounters {
                rx_bytes: 5000,
                tx_bytes: 2500,
                ..Default::default()
            },
            disk: DiskCapacity {
                total: 1000,
                available: 250,
            },
            ..Default::default()
        };

        let snapshot = build_snapshot(&later, Some((&earlier, 2.0)), Utc::now());

        // 100 idle jiffies out of 400
        assert!((snapshot.cpu.usage - 75.0).abs() < 1e-9);
        assert!((snapshot.network.bytes_in_per_sec - 2000.0).abs() < 1e-9);
        assert!((snapshot.network.bytes_out_per_sec - 1000.0).abs() < 1e-9);
        assert_eq!(snapshot.disk.used, 750);
        assert!((snapshot.disk.used_percent() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_first_sample_uses_cumulative_counters() {
        let raw = RawSample {
            cpu: CpuTimes {
                idle: 900,
                total: 1000,
            },
            net: NetCounters {
                rx_bytes: 1_000_000,
                ..Default::default()
            },
            ..Default::default()
        };

        let snapshot = build_snapshot(&raw, None, Utc::now());
        assert!((snapshot.cpu.usage - 10.0).abs() < 1e-9);
        assert_eq!(snapshot.network.bytes_in_per_sec, 0.0);
    }

    #[tokio::test]
    async fn test_sampling_builds_history_and_trend() {
        let monitor = monitor_with(ScriptedProbe::from_usage(&[
            (10.0, 40.0),
            (20.0, 40.0),
            (30.0, 40.0),
            (40.0, 40.0),
            (50.0, 40.0),
        ]));

        for _ in 0..5 {
            monitor.sample_once().await.unwrap();
        }

        let history = monitor.get_historical_data();
        assert_eq!(history.len(), 5);
        assert!((history[0].snapshot.cpu.usage - 10.0).abs() < 1e-9);
        assert!((monitor.get_metrics().cpu.usage - 50.0).abs() < 1e-9);
        assert_eq!(monitor.get_predictions().cpu_trend, Trend::Increasing);
        assert_eq!(monitor.get_predictions().memory_trend, Trend::Stable);
    }

    #[test]
    fn test_history_drops_samples_outside_retention() {
        let config = MonitorConfig {
            retention_period_mins: 10,
            ..Default::default()
        };
        let monitor = SystemMonitor::new(config, Arc::new(ScriptedProbe::new())).unwrap();
        let start = Utc::now();
        let at = Instant::now();

        // One sample every 4 minutes over 20 minutes
        for step in 0..6i64 {
            monitor.record(RawSample::default(), at, start + Duration::minutes(step * 4));
        }

        let history = monitor.get_historical_data();
        let newest = start + Duration::minutes(20);
        let ages: Vec<i64> = history
            .iter()
            .map(|entry| (newest - entry.timestamp).num_minutes())
            .collect();
        assert_eq!(ages, vec![8, 4, 0]);

        let unbounded = MonitorConfig {
            retention_period_mins: 200_000_000_000,
            ..Default::default()
        };
        assert!(SystemMonitor::new(unbounded, Arc::new(ScriptedProbe::new())).is_err());
    }

    #[tokio::test]
    async fn test_single_sample_has_no_prediction() {
        let monitor = monitor_with(ScriptedProbe::from_usage(&[(95.0, 95.0)]));
        monitor.sample_once().await.unwrap();

        let predictions = monitor.get_predictions();
        assert!(predictions.performance_issues.is_empty());
        assert_eq!(predictions.cpu_trend, Trend::Stable);
    }

    #[tokio::test]
    async fn test_alerts_and_issues_published() {
        let probe = ScriptedProbe::new();
        probe.push_usage(20.0, 50.0);
        probe.push_usage_with_latency(95.0, 92.0, 150.0);
        let monitor = monitor_with(probe);
        let mut events = monitor.subscribe();

        monitor.sample_once().await.unwrap();
        monitor.sample_once().await.unwrap();

        let mut alerts = Vec::new();
        let mut updates = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                MonitorEvent::SystemAlerts(raised) => alerts.extend(raised),
                MonitorEvent::MetricsUpdate(_) => updates += 1,
                MonitorEvent::MonitoringError(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(updates, 2);
        assert_eq!(
            alerts,
            vec![
                "High CPU usage: 95.0%".to_string(),
                "High memory usage: 92.0%".to_string(),
                "High network latency: 150.0ms".to_string(),
            ]
        );

        let issues = monitor.get_predictions().performance_issues;
        assert_eq!(issues.len(), 3);
        assert!(issues.contains(&"Memory pressure detected".to_string()));
    }

    #[tokio::test]
    async fn test_sampling_error_degrades_and_recovers() {
        let probe = ScriptedProbe::new();
        probe.push_failure("proc unreadable");
        probe.push_usage(10.0, 10.0);

        let health = HealthRegistry::for_control_loop().await;
        let monitor = SystemMonitor::with_health(
            MonitorConfig::default(),
            Arc::new(probe),
            health.clone(),
            StructuredLogger::default(),
        )
        .unwrap();
        let mut events = monitor.subscribe();

        assert!(monitor.sample_once().await.is_err());
        assert_eq!(
            events.recv().await.unwrap(),
            MonitorEvent::MonitoringError("proc unreadable".to_string())
        );
        assert_eq!(
            health.status_of(components::MONITOR).await,
            Some(ComponentStatus::Degraded)
        );

        monitor.sample_once().await.unwrap();
        assert_eq!(
            health.status_of(components::MONITOR).await,
            Some(ComponentStatus::Healthy)
        );
    }

    #[tokio::test]
    async fn test_invalid_interval_rejected() {
        let config = MonitorConfig {
            update_interval_ms: 0,
            ..Default::default()
        };
        assert!(SystemMonitor::new(config, Arc::new(ScriptedProbe::new())).is_err());
    }

    #[tokio::test]
    async fn test_cleanup_closes_subscriptions() {
        let monitor = monitor_with(ScriptedProbe::from_usage(&[(10.0, 10.0)]));
        let mut events = monitor.subscribe();
        monitor.sample_once().await.unwrap();
        monitor.cleanup();

        assert!(matches!(
            events.recv().await,
            Some(MonitorEvent::MetricsUpdate(_))
        ));
        assert!(events.recv().await.is_none());
        assert!(monitor.get_historical_data().is_empty());
    }
}
