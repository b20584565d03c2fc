//! Built-in optimization strategies

use super::thresholds::AdaptiveThresholds;
use crate::models::{Prediction, Resource, ResourceSnapshot, Trend};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Queue length above which task queue optimization applies
pub const QUEUE_SIZE_TRIGGER: usize = 10;

/// The statically declared strategy set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StrategyKind {
    Memory,
    Cpu,
    Network,
    TaskQueue,
    PredictiveScaling,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::Memory,
        StrategyKind::Cpu,
        StrategyKind::Network,
        StrategyKind::TaskQueue,
        StrategyKind::PredictiveScaling,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Memory => "Memory Optimization",
            StrategyKind::Cpu => "CPU Optimization",
            StrategyKind::Network => "Network Optimization",
            StrategyKind::TaskQueue => "Task Queue Optimization",
            StrategyKind::PredictiveScaling => "Predictive Scaling",
        }
    }

    /// Lower runs first
    pub fn priority(&self) -> u32 {
        match self {
            StrategyKind::Memory => 1,
            StrategyKind::Cpu => 2,
            StrategyKind::Network => 3,
            StrategyKind::TaskQueue => 4,
            StrategyKind::PredictiveScaling => 5,
        }
    }

    pub fn default_cooldown(&self) -> Duration {
        let secs = match self {
            StrategyKind::Memory => 60,
            StrategyKind::Cpu => 30,
            StrategyKind::Network => 120,
            StrategyKind::TaskQueue => 45,
            StrategyKind::PredictiveScaling => 300,
        };
        Duration::from_secs(secs)
    }

    /// Resource whose adaptive threshold gates this strategy
    pub fn resource(&self) -> Option<Resource> {
        match self {
            StrategyKind::Memory => Some(Resource::Memory),
            StrategyKind::Cpu => Some(Resource::Cpu),
            StrategyKind::Network => Some(Resource::Network),
            StrategyKind::TaskQueue | StrategyKind::PredictiveScaling => None,
        }
    }

    /// Word matched against bottleneck descriptions
    pub fn keyword(&self) -> &'static str {
        match self {
            StrategyKind::Memory => "memory",
            StrategyKind::Cpu => "cpu",
            StrategyKind::Network => "network",
            StrategyKind::TaskQueue => "task queue",
            StrategyKind::PredictiveScaling => "predictive",
        }
    }

    /// Name of the mitigation task delegated to the executor
    pub fn task_name(&self) -> &'static str {
        match self {
            StrategyKind::Memory => "memory-optimization",
            StrategyKind::Cpu => "cpu-optimization",
            StrategyKind::Network => "network-optimization",
            StrategyKind::TaskQueue => "queue-optimization",
            StrategyKind::PredictiveScaling => "predictive-scaling",
        }
    }

    /// Match against the headline of a description, the text before `:`
    pub fn matches_bottleneck(&self, bottleneck: &str) -> bool {
        let headline = bottleneck.split(':').next().unwrap_or_default();
        headline.to_lowercase().contains(self.keyword())
    }

    /// Trigger condition against the current view and thresholds
    pub fn applies(&self, view: &MetricsView, thresholds: &AdaptiveThresholds) -> bool {
        match self {
            StrategyKind::Memory => view.memory_percent > thresholds.get(Resource::Memory),
            StrategyKind::Cpu => view.cpu_percent > thresholds.get(Resource::Cpu),
            StrategyKind::Network => view.latency_ms > thresholds.get(Resource::Network),
            StrategyKind::TaskQueue => view.queue_size > QUEUE_SIZE_TRIGGER,
            StrategyKind::PredictiveScaling => {
                let prediction = &view.prediction;
                prediction.cpu_trend == Trend::Increasing
                    || prediction.memory_exhaustion.is_some()
                    || !prediction.performance_issues.is_empty()
            }
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Inputs the strategy conditions are evaluated against
#[derive(Debug, Clone, Default)]
pub struct MetricsView {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub latency_ms: f64,
    pub queue_size: usize,
    pub prediction: Prediction,
}

impl MetricsView {
    pub fn from_snapshot(snapshot: &ResourceSnapshot, queue_size: usize) -> Self {
        Self {
            cpu_percent: snapshot.cpu.usage,
            memory_percent: snapshot.memory.percentage,
            latency_ms: snapshot.network.latency_ms,
            queue_size,
            prediction: snapshot.predictions.clone(),
        }
    }
}

/// Mutable run statistics for one strategy
#[derive(Debug, Clone)]
pub struct Strategy {
    pub kind: StrategyKind,
    pub cooldown: Duration,
    pub success_rate: f64,
    pub execution_count: u64,
    last_executed: Option<Instant>,
    last_executed_at: Option<DateTime<Utc>>,
}

impl Strategy {
    pub fn new(kind: StrategyKind) -> Self {
        Self {
            kind,
            cooldown: kind.default_cooldown(),
            success_rate: 1.0,
            execution_count: 0,
            last_executed: None,
            last_executed_at: None,
        }
    }

    pub fn off_cooldown(&self, now: Instant) -> bool {
        self.last_executed
            .map(|last| now.duration_since(last) >= self.cooldown)
            .unwrap_or(true)
    }

    /// Fold one outcome into the rolling success rate
    pub fn record(&mut self, success: bool) {
        self.execution_count += 1;
        let n = self.execution_count as f64;
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate = (self.success_rate * (n - 1.0) + outcome) / n;
    }

    pub fn mark_executed(&mut self, at: Instant) {
        self.last_executed = Some(at);
        self.last_executed_at = Some(Utc::now());
    }

    pub fn stats(&self) -> StrategyStats {
        StrategyStats {
            name: self.kind.name().to_string(),
            priority: self.kind.priority(),
            success_rate: self.success_rate,
            execution_count: self.execution_count,
            last_executed: self.last_executed_at,
        }
    }
}

/// Reporting view of a strategy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyStats {
    pub name: String,
    pub priority: u32,
    pub success_rate: f64,
    pub execution_count: u64,
    pub last_executed: Option<DateTime<Utc>>,
}

/// Priority ascending, then success rate descending
pub fn rank(strategies: &mut [&Strategy]) {
    strategies.sort_by(|a, b| {
        a.kind.priority().cmp(&b.kind.priority()).then_with(|| {
            b.success_rate
                .partial_cmp(&a.success_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    });
}
