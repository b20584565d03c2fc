//! Trend fitting and threshold checks over the historical series

use crate::config::AlertThresholds;
use crate::models::{HistoricalEntry, Prediction, ResourceSnapshot, Trend};
use chrono::{DateTime, Utc};

/// Slopes below this magnitude are considered flat
pub const STABLE_SLOPE: f64 = 0.1;

pub const ISSUE_CPU_PERCENT: f64 = 80.0;
pub const ISSUE_MEMORY_PERCENT: f64 = 85.0;
pub const ISSUE_LATENCY_MS: f64 = 100.0;

/// Least-squares line over equally spaced samples
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrendLine {
    /// Change per sample
    pub slope: f64,
    pub intercept: f64,
}

impl TrendLine {
    pub fn trend(&self) -> Trend {
        classify(self.slope)
    }
}

/// Fit `y = slope * i + intercept` with `i` the sample index
pub fn fit_trend(values: &[f64]) -> TrendLine {
    let n = values.len() as f64;
    if values.len() < 2 {
        return TrendLine::default();
    }

    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx) = (0.0, 0.0, 0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON {
        return TrendLine::default();
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;
    TrendLine { slope, intercept }
}

pub fn classify(slope: f64) -> Trend {
    if slope.abs() < STABLE_SLOPE {
        Trend::Stable
    } else if slope > 0.0 {
        Trend::Increasing
    } else {
        Trend::Decreasing
    }
}

/// Build predictions from the history, oldest entry first
///
/// Returns `None` with fewer than two samples.
pub fn predict(history: &[HistoricalEntry], now: DateTime<Utc>) -> Option<Prediction> {
    let (first, last) = match history {
        [first, .., last] => (first, last),
        _ => return None,
    };

    let spacing_ms = (last.timestamp - first.timestamp).num_milliseconds().max(0) as f64
        / (history.len() - 1) as f64;

    let series = |value: fn(&ResourceSnapshot) -> f64| -> Vec<f64> {
        history.iter().map(|entry| value(&entry.snapshot)).collect()
    };
    let cpu = fit_trend(&series(|s| s.cpu.usage));
    let memory = fit_trend(&series(|s| s.memory.percentage));
    let disk = fit_trend(&series(|s| s.disk.used_percent()));

    let current = &last.snapshot;
    Some(Prediction {
        cpu_trend: cpu.trend(),
        memory_trend: memory.trend(),
        disk_trend: disk.trend(),
        memory_exhaustion: project_exhaustion(current.memory.percentage, memory.slope, spacing_ms, now),
        disk_exhaustion: project_exhaustion(current.disk.used_percent(), disk.slope, spacing_ms, now),
        performance_issues: performance_issues(current),
    })
}

/// Extrapolate a rising percentage to 100
pub fn project_exhaustion(
    current: f64,
    slope: f64,
    spacing_ms: f64,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if slope <= 0.0 {
        return None;
    }
    let samples_left = ((100.0 - current) / slope).max(0.0);
    let millis = (samples_left * spacing_ms) as i64;
    now.checked_add_signed(chrono::Duration::milliseconds(millis))
}

pub fn performance_issues(snapshot: &ResourceSnapshot) -> Vec<String> {
    let mut issues = Vec::new();
    if snapshot.cpu.usage > ISSUE_CPU_PERCENT {
        issues.push("High CPU utilization may cause performance degradation".to_string());
    }
    if snapshot.memory.percentage > ISSUE_MEMORY_PERCENT {
        issues.push("Memory pressure detected".to_string());
    }
    if snapshot.network.latency_ms > ISSUE_LATENCY_MS {
        issues.push("High network latency detected".to_string());
    }
    issues
}

/// Every metric above its alert threshold, with its current value
pub fn alerts(snapshot: &ResourceSnapshot, thresholds: &AlertThresholds) -> Vec<String> {
    let mut alerts = Vec::new();
    if snapshot.cpu.usage > thresholds.cpu {
        alerts.push(format!("High CPU usage: {:.1}%", snapshot.cpu.usage));
    }
    if snapshot.memory.percentage > thresholds.memory {
        alerts.push(format!("High memory usage: {:.1}%", snapshot.memory.percentage));
    }
    let disk = snapshot.disk.used_percent();
    if disk > thresholds.disk {
        alerts.push(format!("High disk usage: {:.1}%", disk));
    }
    if snapshot.network.latency_ms > thresholds.network {
        alerts.push(format!(
            "High network latency: {:.1}ms",
            snapshot.network.latency_ms
        ));
    }
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CpuStats, MemoryStats};

    fn entry(at: DateTime<Utc>, cpu: f64, memory: f64) -> HistoricalEntry {
        let snapshot = ResourceSnapshot {
            timestamp: at,
            cpu: CpuStats {
                usage: cpu,
                ..Default::default()
            },
            memory: MemoryStats {
                percentage: memory,
                ..Default::default()
            },
            ..Default::default()
        };
        HistoricalEntry {
            timestamp: at,
            snapshot,
        }
    }

    fn series(cpu: &[f64], memory: &[f64]) -> Vec<HistoricalEntry> {
        let start = Utc::now();
        cpu.iter()
            .zip(memory)
            .enumerate()
            .map(|(i, (c, m))| entry(start + chrono::Duration::seconds(i as i64), *c, *m))
            .collect()
    }

    #[test]
    fn test_fit_linear_series() {
        let line = fit_trend(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        assert!((line.slope - 10.0).abs() < 1e-9);
        assert!((line.intercept - 10.0).abs() < 1e-9);
        assert_eq!(line.trend(), Trend::Increasing);
    }

    #[test]
    fn test_fit_degenerate_inputs() {
        assert_eq!(fit_trend(&[]), TrendLine::default());
        assert_eq!(fit_trend(&[42.0]), TrendLine::default());
        assert_eq!(fit_trend(&[5.0, 5.0, 5.0]).trend(), Trend::Stable);
    }

    #[test]
    fn test_classify_threshold() {
        assert_eq!(classify(0.09), Trend::Stable);
        assert_eq!(classify(-0.09), Trend::Stable);
        assert_eq!(classify(0.1), Trend::Increasing);
        assert_eq!(classify(-2.0), Trend::Decreasing);
    }

    #[test]
    fn test_increasing_cpu_prediction() {
        let history = series(&[10.0, 20.0, 30.0, 40.0, 50.0], &[40.0; 5]);
        let prediction = predict(&history, Utc::now()).unwrap();

        assert_eq!(prediction.cpu_trend, Trend::Increasing);
        assert_eq!(prediction.memory_trend, Trend::Stable);
        assert!(prediction.memory_exhaustion.is_none());
        assert!(prediction.performance_issues.is_empty());
    }

    #[test]
    fn test_memory_exhaustion_projection() {
        let history = series(&[10.0; 3], &[60.0, 70.0, 80.0]);
        let now = Utc::now();
        let prediction = predict(&history, now).unwrap();

        // Two more samples at one-second spacing
        let eta = prediction.memory_exhaustion.unwrap();
        assert_eq!((eta - now).num_milliseconds(), 2000);
    }

    #[test]
    fn test_needs_two_samples() {
        let history = series(&[90.0], &[90.0]);
        assert!(predict(&history, Utc::now()).is_none());
    }

    #[test]
    fn test_issues_and_alerts() {
        let mut snapshot = ResourceSnapshot::default();
        snapshot.cpu.usage = 91.26;
        snapshot.memory.percentage = 86.0;
        snapshot.network.latency_ms = 150.0;

        let issues = performance_issues(&snapshot);
        assert_eq!(issues.len(), 3);
        assert_eq!(issues[1], "Memory pressure detected");

        let raised = alerts(&snapshot, &AlertThresholds::default());
        assert_eq!(
            raised,
            vec![
                "High CPU usage: 91.3%".to_string(),
                "High network latency: 150.0ms".to_string(),
            ]
        );
    }
}
