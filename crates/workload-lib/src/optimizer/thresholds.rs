//! Optimizer-side adaptive thresholds

use super::OptimizationResult;
use crate::executor::clamp_threshold;
use crate::models::{Prediction, Resource, Trend};
use std::collections::BTreeMap;

/// Number of recent results per resource considered for adaptation
pub const RECENT_WINDOW: usize = 5;

const WORSENING_STEP: f64 = -5.0;
const FAILING_STEP: f64 = -3.0;
const SUCCEEDING_STEP: f64 = 3.0;

/// Per-resource trigger levels, always within the adaptive band
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveThresholds {
    values: BTreeMap<Resource, f64>,
}

impl Default for AdaptiveThresholds {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveThresholds {
    /// cpu 70, memory 80, network latency 100ms (held at the band ceiling)
    pub fn new() -> Self {
        let values = [
            (Resource::Cpu, 70.0),
            (Resource::Memory, 80.0),
            (Resource::Network, 100.0),
        ]
        .into_iter()
        .map(|(resource, value)| (resource, clamp_threshold(value)))
        .collect();
        Self { values }
    }

    pub fn get(&self, resource: Resource) -> f64 {
        self.values.get(&resource).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, resource: Resource, value: f64) {
        self.values.insert(resource, clamp_threshold(value));
    }

    /// Thresholds keyed by resource name
    pub fn as_map(&self) -> BTreeMap<String, f64> {
        self.values
            .iter()
            .map(|(resource, value)| (resource.as_str().to_string(), *value))
            .collect()
    }

    /// Recompute every threshold from recent outcomes and the forecast
    pub fn update<'a, I>(&mut self, history: I, prediction: &Prediction)
    where
        I: DoubleEndedIterator<Item = &'a OptimizationResult> + Clone,
    {
        for resource in Resource::ALL {
            let rate = recent_success_rate(history.clone(), resource, RECENT_WINDOW);
            let current = self.get(resource);
            self.set(resource, current + adjustment(resource, rate, prediction));
        }
    }
}

/// Success ratio of the last `count` results whose strategy concerns `resource`
///
/// 1.0 when there is no relevant history.
pub fn recent_success_rate<'a, I>(history: I, resource: Resource, count: usize) -> f64
where
    I: DoubleEndedIterator<Item = &'a OptimizationResult>,
{
    let recent: Vec<bool> = history
        .rev()
        .filter(|result| result.strategy.to_lowercase().contains(resource.as_str()))
        .take(count)
        .map(|result| result.success)
        .collect();

    if recent.is_empty() {
        return 1.0;
    }
    recent.iter().filter(|success| **success).count() as f64 / recent.len() as f64
}

fn worsening(resource: Resource, prediction: &Prediction) -> bool {
    match resource {
        Resource::Cpu => prediction.cpu_trend == Trend::Increasing,
        Resource::Memory => prediction.memory_trend == Trend::Increasing,
        Resource::Network => prediction
            .performance_issues
            .iter()
            .any(|issue| issue.to_lowercase().contains("latency")),
    }
}

/// Threshold step for one resource
pub fn adjustment(resource: Resource, success_rate: f64, prediction: &Prediction) -> f64 {
    if worsening(resource, prediction) {
        WORSENING_STEP
    } else if success_rate < 0.5 {
        FAILING_STEP
    } else if success_rate > 0.8 && prediction.performance_issues.is_empty() {
        SUCCEEDING_STEP
    } else {
        0.0
    }
}
