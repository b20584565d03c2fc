//! Operational metrics bookkeeping
//!
//! Holds the executor's aggregate metrics and reproduces the derived
//! quality and cost formulas after every task completion.

use crate::models::{OperationalMetrics, ResourceUsage};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Window used for the current-throughput estimate
pub const THROUGHPUT_WINDOW: Duration = Duration::from_secs(60);

/// Downtime charged per attempt of a task that has failed at least once
pub const DOWNTIME_PER_ATTEMPT_MS: f64 = 1000.0;

/// Mutable metrics aggregate owned by the executor
#[derive(Debug)]
pub struct MetricsLedger {
    metrics: OperationalMetrics,
    categories: HashMap<String, String>,
    last_seen: HashMap<String, Instant>,
    completions: VecDeque<Instant>,
    started: Instant,
}

impl Default for MetricsLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsLedger {
    pub fn new() -> Self {
        Self {
            metrics: OperationalMetrics::default(),
            categories: HashMap::new(),
            last_seen: HashMap::new(),
            completions: VecDeque::new(),
            started: Instant::now(),
        }
    }

    /// Remember which category a task name belongs to
    pub fn register_task(&mut self, name: &str, category: &str) {
        self.categories.insert(name.to_string(), category.to_string());
        self.last_seen.insert(name.to_string(), Instant::now());
    }

    /// Record a successful execution
    ///
    /// `downtime_ms` is the attempts-driven downtime proxy summed over the
    /// tasks currently in flight.
    pub fn record_success(
        &mut self,
        name: &str,
        execution_ms: f64,
        in_flight: usize,
        cap: usize,
        downtime_ms: f64,
    ) {
        self.metrics
            .task_execution_times
            .insert(name.to_string(), execution_ms);
        self.metrics.resource_utilization = utilization(in_flight, cap);
        self.metrics.throughput.successful_tasks += 1;

        self.metrics.quality_metrics.performance_score = self.performance_score();
        self.metrics.quality_metrics.reliability = self.reliability();
        self.metrics.quality_metrics.availability = self.availability(downtime_ms);
        self.update_cost_metrics();
    }

    /// Record a task that exhausted its retry budget
    pub fn record_failure(&mut self, name: &str) {
        let executions = self.metrics.task_execution_times.len() as f64;
        let current = self.metrics.error_rates.get(name).copied().unwrap_or(0.0);
        let rate = (current * executions + 1.0) / (executions + 1.0);
        self.metrics.error_rates.insert(name.to_string(), rate);

        self.metrics.throughput.failed_tasks += 1;
        self.metrics.quality_metrics.success_rate = self.success_rate();
        self.metrics.quality_metrics.reliability = self.reliability();
    }

    /// Update throughput after any terminal outcome
    pub fn record_completion(&mut self) {
        let now = Instant::now();
        self.completions.push_back(now);
        self.expire_completions(now);

        let throughput = &mut self.metrics.throughput;
        let total = (throughput.successful_tasks + throughput.failed_tasks) as f64;
        let elapsed = self.started.elapsed().as_secs_f64();
        throughput.tasks_per_second = if elapsed > 0.0 { total / elapsed } else { 0.0 };
    }

    /// Apply a resource observation to the cost metrics
    pub fn observe_usage(&mut self, usage: ResourceUsage) {
        self.metrics.cost_metrics.memory_usage = usage.memory_percent;
        self.metrics.cost_metrics.network_usage = usage.network_kb_per_sec;
        self.update_cost_metrics();
    }

    pub fn set_utilization(&mut self, in_flight: usize, cap: usize) {
        self.metrics.resource_utilization = utilization(in_flight, cap);
    }

    /// Completions within the last minute, in tasks per second
    pub fn current_throughput(&mut self) -> f64 {
        self.expire_completions(Instant::now());
        self.completions.len() as f64 / THROUGHPUT_WINDOW.as_secs_f64()
    }

    /// Sum of per-task error rates grouped by task category
    pub fn errors_by_category(&self) -> BTreeMap<String, f64> {
        let mut grouped = BTreeMap::new();
        for (task, rate) in &self.metrics.error_rates {
            let category = self
                .categories
                .get(task)
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            *grouped.entry(category).or_insert(0.0) += rate;
        }
        grouped
    }

    pub fn metrics(&self) -> &OperationalMetrics {
        &self.metrics
    }

    pub fn snapshot(&self) -> OperationalMetrics {
        self.metrics.clone()
    }

    /// Drop bookkeeping for task names idle longer than `stale_after`
    ///
    /// Error rates are kept because they feed the success rate.
    pub fn compact(&mut self, stale_after: Duration) -> usize {
        let stale: Vec<String> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| seen.elapsed() >= stale_after)
            .map(|(name, _)| name.clone())
            .collect();

        for name in &stale {
            self.last_seen.remove(name);
            self.metrics.task_execution_times.remove(name);
            if !self.metrics.error_rates.contains_key(name) {
                self.categories.remove(name);
            }
        }

        self.expire_completions(Instant::now());
        self.completions.shrink_to_fit();
        self.categories.shrink_to_fit();
        self.last_seen.shrink_to_fit();
        self.metrics.task_execution_times.shrink_to_fit();

        stale.len()
    }

    fn expire_completions(&mut self, now: Instant) {
        while let Some(front) = self.completions.front() {
            if now.duration_since(*front) > THROUGHPUT_WINDOW {
                self.completions.pop_front();
            } else {
                break;
            }
        }
    }

    fn performance_score(&self) -> f64 {
        let time_score = (100.0 - self.metrics.average_execution_ms() / 1000.0).max(0.0);
        let utilization_score = (100.0 - self.metrics.resource_utilization).max(0.0);
        let error_score = self.metrics.quality_metrics.success_rate;
        (time_score + utilization_score + error_score) / 3.0
    }

    fn success_rate(&self) -> f64 {
        let total_errors: f64 = self.metrics.error_rates.values().sum();
        (100.0 - total_errors * 100.0).max(0.0)
    }

    fn reliability(&self) -> f64 {
        let throughput = &self.metrics.throughput;
        let total = throughput.successful_tasks + throughput.failed_tasks;
        if total == 0 {
            return 100.0;
        }
        throughput.successful_tasks as f64 / total as f64 * 100.0
    }

    fn availability(&self, downtime_ms: f64) -> f64 {
        let total_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        if total_ms <= 0.0 {
            return 100.0;
        }
        (100.0 - downtime_ms / total_ms * 100.0).max(0.0)
    }

    fn update_cost_metrics(&mut self) {
        let cost = &mut self.metrics.cost_metrics;
        let cpu_cost = self.metrics.resource_utilization * 0.01;
        let memory_cost = cost.memory_usage * 0.001;
        cost.compute_cost = cpu_cost + memory_cost;
        cost.resource_cost = cost.network_usage * 0.0001;
    }
}

fn utilization(in_flight: usize, cap: usize) -> f64 {
    if cap == 0 {
        return 0.0;
    }
    in_flight as f64 / cap as f64 * 100.0
}
