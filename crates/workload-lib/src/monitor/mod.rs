//! Host and process resource monitoring
//!
//! Samples the host on a fixed interval, keeps a retention-bounded
//! historical series, fits linear trends to predict exhaustion and raises
//! threshold alerts.

mod probe;
mod trend;

#[cfg(test)]
mod tests;

pub use probe::{
    CpuTimes, DiskCapacity, DiskIoCounters, NetCounters, ProcfsProbe, RawSample, ResourceProbe,
    ScriptedProbe,
};
pub use trend::{
    alerts, classify, fit_trend, performance_issues, predict, project_exhaustion, TrendLine,
    STABLE_SLOPE,
};

use crate::config::{ConfigError, MonitorConfig};
use crate::events::{EventBus, NamedEvent};
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::{
    CpuStats, DiskStats, HistoricalEntry, NetworkStats, Prediction, ResourceSnapshot,
};
use crate::observability::{ControlMetrics, StructuredLogger};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Notifications emitted by the monitor
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    MetricsUpdate(Box<ResourceSnapshot>),
    SystemAlerts(Vec<String>),
    MonitoringError(String),
}

impl NamedEvent for MonitorEvent {
    fn name(&self) -> &'static str {
        match self {
            MonitorEvent::MetricsUpdate(_) => "metrics-update",
            MonitorEvent::SystemAlerts(_) => "system-alerts",
            MonitorEvent::MonitoringError(_) => "monitoring-error",
        }
    }
}

#[derive(Default)]
struct MonitorState {
    previous: Option<(RawSample, Instant)>,
    current: ResourceSnapshot,
    history: VecDeque<HistoricalEntry>,
}

struct MonitorInner {
    config: MonitorConfig,
    probe: Arc<dyn ResourceProbe>,
    state: Mutex<MonitorState>,
    events: EventBus<MonitorEvent>,
    health: HealthRegistry,
    metrics: ControlMetrics,
    logger: StructuredLogger,
}

/// Periodic host sampler
#[derive(Clone)]
pub struct SystemMonitor {
    inner: Arc<MonitorInner>,
}

impl SystemMonitor {
    pub fn new(config: MonitorConfig, probe: Arc<dyn ResourceProbe>) -> Result<Self, ConfigError> {
        Self::with_health(config, probe, HealthRegistry::new(), StructuredLogger::default())
    }

    pub fn with_health(
        config: MonitorConfig,
        probe: Arc<dyn ResourceProbe>,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(MonitorInner {
                config,
                probe,
                state: Mutex::new(MonitorState::default()),
                events: EventBus::new(),
                health,
                metrics: ControlMetrics::new(),
                logger,
            }),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<MonitorEvent> {
        self.inner.events.subscribe()
    }

    /// Most recent snapshot
    pub fn get_metrics(&self) -> ResourceSnapshot {
        self.state().current.clone()
    }

    pub fn get_predictions(&self) -> Prediction {
        self.state().current.predictions.clone()
    }

    /// Retained samples, oldest first
    pub fn get_historical_data(&self) -> Vec<HistoricalEntry> {
        self.state().history.iter().cloned().collect()
    }

    /// Take one sample and publish the results
    ///
    /// Failures are reported through `monitoring-error` and the health
    /// registry before being returned.
    pub async fn sample_once(&self) -> anyhow::Result<ResourceSnapshot> {
        let inner = &self.inner;
        let started = Instant::now();

        let raw = match inner.probe.sample().await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Resource sampling failed");
                inner.metrics.inc_sampling_errors();
                inner
                    .health
                    .set_degraded(components::MONITOR, format!("Sampling failed: {}", e))
                    .await;
                inner
                    .events
                    .emit(MonitorEvent::MonitoringError(e.to_string()));
                return Err(e);
            }
        };

        let snapshot = self.record(raw, Instant::now(), Utc::now());
        inner
            .metrics
            .observe_sample_latency(started.elapsed().as_secs_f64());
        inner
            .metrics
            .set_host_usage(snapshot.cpu.usage, snapshot.memory.percentage);

        if inner.health.status_of(components::MONITOR).await != Some(ComponentStatus::Healthy) {
            inner.health.set_healthy(components::MONITOR).await;
        }

        inner
            .events
            .emit(MonitorEvent::MetricsUpdate(Box::new(snapshot.clone())));

        let raised = alerts(&snapshot, &inner.config.alert_thresholds);
        if !raised.is_empty() {
            inner.logger.log_system_alerts(&raised);
            inner.events.emit(MonitorEvent::SystemAlerts(raised));
        }

        Ok(snapshot)
    }

    /// Fold a raw sample into the current snapshot and history
    fn record(&self, raw: RawSample, at: Instant, now: DateTime<Utc>) -> ResourceSnapshot {
        let config = &self.inner.config;
        let mut state = self.state();

        let previous = state
            .previous
            .as_ref()
            .map(|(sample, taken)| (sample, at.duration_since(*taken).as_secs_f64()));
        let mut snapshot = build_snapshot(&raw, previous, now);
        state.previous = Some((raw, at));

        state.history.push_back(HistoricalEntry {
            timestamp: now,
            snapshot: snapshot.clone(),
        });
        if let Some(cutoff) = now.checked_sub_signed(config.retention()) {
            while state
                .history
                .front()
                .map(|entry| entry.timestamp < cutoff)
                .unwrap_or(false)
            {
                state.history.pop_front();
            }
        }

        if config.enable_predictions {
            let history = state.history.make_contiguous();
            match predict(history, now) {
                Some(prediction) => snapshot.predictions = prediction,
                // Too little history, keep the previous forecast
                None => snapshot.predictions = state.current.predictions.clone(),
            }
            if let Some(last) = state.history.back_mut() {
                last.snapshot.predictions = snapshot.predictions.clone();
            }
        }

        debug!(
            cpu = snapshot.cpu.usage,
            memory = snapshot.memory.percentage,
            samples = state.history.len(),
            "Host sampled"
        );
        state.current = snapshot.clone();
        snapshot
    }

    /// Sample on the configured interval until shutdown
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = self.inner.config.update_interval_ms,
            retention_mins = self.inner.config.retention_period_mins,
            "Starting system monitor"
        );

        let mut ticker = interval(self.inner.config.update_interval());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Errors are already published, the loop keeps sampling
                    let _ = self.sample_once().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down system monitor");
                    break;
                }
            }
        }
    }

    /// Drop history and release every subscription
    pub fn cleanup(&self) {
        let mut state = self.state();
        state.history.clear();
        state.previous = None;
        drop(state);
        self.inner.events.close();
    }

    fn state(&self) -> MutexGuard<'_, MonitorState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Turn a raw sample into a snapshot, using the previous sample for rates
///
/// `previous` carries the earlier sample and the seconds elapsed since it.
pub fn build_snapshot(
    raw: &RawSample,
    previous: Option<(&RawSample, f64)>,
    timestamp: DateTime<Utc>,
) -> ResourceSnapshot {
    let (idle, total) = match previous {
        Some((prev, _)) if raw.cpu.total > prev.cpu.total => (
            raw.cpu.idle.saturating_sub(prev.cpu.idle),
            raw.cpu.total - prev.cpu.total,
        ),
        _ => (raw.cpu.idle, raw.cpu.total),
    };
    let usage = if total > 0 {
        ((1.0 - idle as f64 / total as f64) * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    let rate = |current: u64, earlier: u64| -> f64 {
        match previous {
            Some((_, elapsed)) if elapsed > 0.0 => current.saturating_sub(earlier) as f64 / elapsed,
            _ => 0.0,
        }
    };
    let (prev_net, prev_disk) = previous
        .map(|(sample, _)| (sample.net, sample.disk_io))
        .unwrap_or_default();

    let capacity = raw.disk;
    let free = capacity.available.min(capacity.total);

    ResourceSnapshot {
        timestamp,
        cpu: CpuStats {
            usage,
            load_average: raw.load_average,
            frequency_mhz: raw.frequency_mhz,
        },
        memory: raw.memory.clone(),
        network: NetworkStats {
            bytes_in_per_sec: rate(raw.net.rx_bytes, prev_net.rx_bytes),
            bytes_out_per_sec: rate(raw.net.tx_bytes, prev_net.tx_bytes),
            packets_in_per_sec: rate(raw.net.rx_packets, prev_net.rx_packets),
            packets_out_per_sec: rate(raw.net.tx_packets, prev_net.tx_packets),
            errors: raw.net.errors,
            latency_ms: raw.latency_ms,
        },
        disk: DiskStats {
            total: capacity.total,
            used: capacity.total - free,
            free,
            read_bytes_per_sec: rate(raw.disk_io.bytes_read, prev_disk.bytes_read),
            write_bytes_per_sec: rate(raw.disk_io.bytes_written, prev_disk.bytes_written),
            iops: rate(
                raw.disk_io.reads_completed + raw.disk_io.writes_completed,
                prev_disk.reads_completed + prev_disk.writes_completed,
            ),
        },
        process: raw.process.clone(),
        predictions: Prediction::default(),
    }
}
