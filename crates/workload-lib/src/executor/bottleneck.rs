//! Bottleneck detection and response rule selection
//!
//! The scan is a pure function of a signal snapshot so it can be evaluated
//! without a running executor.

use crate::config::{OptimizationRule, RuleAction};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

/// Error rate (per category) above which a bottleneck is raised
pub const CATEGORY_ERROR_RATE_LIMIT: f64 = 0.1;

/// Current throughput below this fraction of the baseline is a degradation
pub const THROUGHPUT_DEGRADATION_RATIO: f64 = 0.7;

pub const MIN_ADAPTIVE_THRESHOLD: f64 = 50.0;
pub const MAX_ADAPTIVE_THRESHOLD: f64 = 95.0;

/// Signals inspected by one bottleneck scan
#[derive(Debug, Clone, Default)]
pub struct ScanSignals {
    pub utilization: f64,
    pub cpu_threshold: f64,
    pub memory_usage: f64,
    pub memory_threshold: f64,
    pub network_usage: f64,
    pub network_limit: f64,
    pub pending_tasks: usize,
    pub concurrency_cap: usize,
    pub average_wait_ms: f64,
    pub errors_by_category: BTreeMap<String, f64>,
    pub current_throughput: f64,
    pub historical_throughput: f64,
}

/// Format a percentage with at most one decimal ("95", "87.5")
pub fn format_percent(value: f64) -> String {
    format!("{}", (value * 10.0).round() / 10.0)
}

/// Synthesize bottleneck descriptions from the current signals
pub fn scan(signals: &ScanSignals) -> Vec<String> {
    let mut bottlenecks = Vec::new();

    if signals.utilization > signals.cpu_threshold {
        bottlenecks.push(format!(
            "High CPU utilization: {}%",
            format_percent(signals.utilization)
        ));
    }

    if signals.memory_usage > signals.memory_threshold {
        bottlenecks.push(format!(
            "High memory usage: {}%",
            format_percent(signals.memory_usage)
        ));
    }

    if signals.network_usage > signals.network_limit {
        bottlenecks.push(format!(
            "High network usage: {:.1} KB/s",
            signals.network_usage
        ));
    }

    if signals.pending_tasks > signals.concurrency_cap {
        bottlenecks.push(format!(
            "Task queue overload: {} tasks pending, avg wait {:.0}ms",
            signals.pending_tasks, signals.average_wait_ms
        ));
    }

    for (category, rate) in &signals.errors_by_category {
        if *rate > CATEGORY_ERROR_RATE_LIMIT {
            bottlenecks.push(format!(
                "High error rate in {}: {:.1}%",
                category,
                rate * 100.0
            ));
        }
    }

    if signals.current_throughput < signals.historical_throughput * THROUGHPUT_DEGRADATION_RATIO {
        bottlenecks.push(format!(
            "Throughput degradation: Current {:.2} tasks/s (Historical: {:.2} tasks/s)",
            signals.current_throughput, signals.historical_throughput
        ));
    }

    bottlenecks
}

/// Pick the single highest-priority rule that applies and is off cooldown
pub fn select_rule<'a>(
    rules: &'a [OptimizationRule],
    utilization: f64,
    last_fired: &HashMap<RuleAction, Instant>,
    now: Instant,
) -> Option<&'a OptimizationRule> {
    let mut ordered: Vec<&OptimizationRule> = rules.iter().collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

    ordered.into_iter().find(|rule| {
        let cooled_down = last_fired
            .get(&rule.action)
            .map(|last| now.duration_since(*last) > rule.cooldown())
            .unwrap_or(true);
        utilization > rule.threshold * 100.0 && cooled_down
    })
}

/// Executor-side threshold adaptation driven by overall performance
pub fn adapt_threshold(threshold: f64, performance_score: f64, utilization: f64) -> f64 {
    let adjustment = if performance_score > 90.0 && utilization < threshold * 0.8 {
        5.0
    } else if performance_score < 70.0 || utilization > threshold * 0.9 {
        -5.0
    } else {
        0.0
    };
    clamp_threshold(threshold + adjustment)
}

pub fn clamp_threshold(value: f64) -> f64 {
    value.clamp(MIN_ADAPTIVE_THRESHOLD, MAX_ADAPTIVE_THRESHOLD)
}
