//! Observability infrastructure for the workload control loop
//!
//! Provides:
//! - Prometheus metrics (task latency, queue pressure, sampling latency,
//!   optimization outcomes, adaptive thresholds, predictor accuracy)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge, register_gauge_vec, register_histogram, register_int_counter,
    register_int_counter_vec, register_int_gauge, Gauge, GaugeVec, Histogram, IntCounter,
    IntCounterVec, IntGauge,
};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ControlMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct ControlMetricsInner {
    task_latency_seconds: Histogram,
    tasks_in_flight: IntGauge,
    tasks_succeeded: IntCounter,
    tasks_failed: IntCounter,
    task_retries: IntCounter,
    queue_full_events: IntCounter,
    bottlenecks_detected: IntCounter,
    concurrency_cap: IntGauge,
    sample_latency_seconds: Histogram,
    sampling_errors: IntCounter,
    host_cpu_percent: Gauge,
    host_memory_percent: Gauge,
    optimization_cycles: IntCounter,
    strategy_executions: IntCounterVec,
    adaptive_threshold: GaugeVec,
    predictor_accuracy: Gauge,
}

impl ControlMetricsInner {
    fn new() -> Self {
        Self {
            task_latency_seconds: register_histogram!(
                "workload_task_latency_seconds",
                "Wall-clock time of successful task executions",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register task_latency_seconds"),

            tasks_in_flight: register_int_gauge!(
                "workload_tasks_in_flight",
                "Number of tasks currently holding a concurrency slot"
            )
            .expect("Failed to register tasks_in_flight"),

            tasks_succeeded: register_int_counter!(
                "workload_tasks_succeeded_total",
                "Total number of tasks that completed successfully"
            )
            .expect("Failed to register tasks_succeeded"),

            tasks_failed: register_int_counter!(
                "workload_tasks_failed_total",
                "Total number of tasks that exhausted their retry budget"
            )
            .expect("Failed to register tasks_failed"),

            task_retries: register_int_counter!(
                "workload_task_retries_total",
                "Total number of task retry attempts"
            )
            .expect("Failed to register task_retries"),

            queue_full_events: register_int_counter!(
                "workload_queue_full_total",
                "Number of submissions that had to wait for a free slot"
            )
            .expect("Failed to register queue_full_events"),

            bottlenecks_detected: register_int_counter!(
                "workload_bottlenecks_detected_total",
                "Total number of bottleneck descriptions raised by scans"
            )
            .expect("Failed to register bottlenecks_detected"),

            concurrency_cap: register_int_gauge!(
                "workload_concurrency_cap",
                "Current executor concurrency cap"
            )
            .expect("Failed to register concurrency_cap"),

            sample_latency_seconds: register_histogram!(
                "workload_monitor_sample_latency_seconds",
                "Time spent sampling host resources",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register sample_latency_seconds"),

            sampling_errors: register_int_counter!(
                "workload_monitor_sampling_errors_total",
                "Total number of failed host samples"
            )
            .expect("Failed to register sampling_errors"),

            host_cpu_percent: register_gauge!(
                "workload_host_cpu_percent",
                "Most recent host CPU usage"
            )
            .expect("Failed to register host_cpu_percent"),

            host_memory_percent: register_gauge!(
                "workload_host_memory_percent",
                "Most recent host memory usage"
            )
            .expect("Failed to register host_memory_percent"),

            optimization_cycles: register_int_counter!(
                "workload_optimization_cycles_total",
                "Number of optimization cycles started"
            )
            .expect("Failed to register optimization_cycles"),

            strategy_executions: register_int_counter_vec!(
                "workload_strategy_executions_total",
                "Strategy executions by strategy and outcome",
                &["strategy", "outcome"]
            )
            .expect("Failed to register strategy_executions"),

            adaptive_threshold: register_gauge_vec!(
                "workload_adaptive_threshold",
                "Current adaptive threshold per resource",
                &["resource"]
            )
            .expect("Failed to register adaptive_threshold"),

            predictor_accuracy: register_gauge!(
                "workload_predictor_accuracy",
                "Recent accuracy of the optimization success predictor"
            )
            .expect("Failed to register predictor_accuracy"),
        }
    }
}

/// Control loop metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ControlMetrics {
    _private: (),
}

impl Default for ControlMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControlMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControlMetricsInner {
        GLOBAL_METRICS.get_or_init(ControlMetricsInner::new)
    }

    pub fn observe_task_latency(&self, duration_secs: f64) {
        self.inner().task_latency_seconds.observe(duration_secs);
    }

    pub fn set_tasks_in_flight(&self, count: i64) {
        self.inner().tasks_in_flight.set(count);
    }

    pub fn inc_tasks_succeeded(&self) {
        self.inner().tasks_succeeded.inc();
    }

    pub fn inc_tasks_failed(&self) {
        self.inner().tasks_failed.inc();
    }

    pub fn inc_task_retries(&self) {
        self.inner().task_retries.inc();
    }

    pub fn inc_queue_full(&self) {
        self.inner().queue_full_events.inc();
    }

    pub fn add_bottlenecks(&self, count: usize) {
        self.inner().bottlenecks_detected.inc_by(count as u64);
    }

    pub fn set_concurrency_cap(&self, cap: usize) {
        self.inner().concurrency_cap.set(cap as i64);
    }

    pub fn observe_sample_latency(&self, duration_secs: f64) {
        self.inner().sample_latency_seconds.observe(duration_secs);
    }

    pub fn inc_sampling_errors(&self) {
        self.inner().sampling_errors.inc();
    }

    pub fn set_host_usage(&self, cpu_percent: f64, memory_percent: f64) {
        self.inner().host_cpu_percent.set(cpu_percent);
        self.inner().host_memory_percent.set(memory_percent);
    }

    pub fn inc_optimization_cycles(&self) {
        self.inner().optimization_cycles.inc();
    }

    pub fn record_strategy_execution(&self, strategy: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.inner()
            .strategy_executions
            .with_label_values(&[strategy, outcome])
            .inc();
    }

    pub fn set_adaptive_threshold(&self, resource: &str, value: f64) {
        self.inner()
            .adaptive_threshold
            .with_label_values(&[resource])
            .set(value);
    }

    pub fn set_predictor_accuracy(&self, accuracy: f64) {
        self.inner().predictor_accuracy.set(accuracy);
    }
}

/// Structured logger for control loop events
///
/// Provides consistent JSON-formatted logging for task failures,
/// bottlenecks, alerts and optimization outcomes.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new("local")
    }
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Log a task that exhausted its retry budget
    pub fn log_task_failed(&self, task: &str, category: &str, attempts: u32, error: &str) {
        warn!(
            event = "task_failed",
            node = %self.node_name,
            task = %task,
            category = %category,
            attempts = attempts,
            error = %error,
            "Task failed after exhausting retries"
        );
    }

    /// Log the result of a bottleneck scan
    pub fn log_bottlenecks(&self, bottlenecks: &[String]) {
        warn!(
            event = "bottleneck_detected",
            node = %self.node_name,
            count = bottlenecks.len(),
            bottlenecks = ?bottlenecks,
            "Bottlenecks detected"
        );
    }

    /// Log threshold breaches raised by the monitor
    pub fn log_system_alerts(&self, alerts: &[String]) {
        warn!(
            event = "system_alert",
            node = %self.node_name,
            alerts = ?alerts,
            "System alert thresholds exceeded"
        );
    }

    /// Log a finished strategy execution
    pub fn log_optimization(&self, strategy: &str, success: bool, duration_ms: u64) {
        if success {
            info!(
                event = "optimization_completed",
                node = %self.node_name,
                strategy = %strategy,
                duration_ms = duration_ms,
                "Optimization strategy succeeded"
            );
        } else {
            warn!(
                event = "optimization_failed",
                node = %self.node_name,
                strategy = %strategy,
                duration_ms = duration_ms,
                "Optimization strategy failed"
            );
        }
    }

    /// Log a threshold adaptation pass
    pub fn log_thresholds_adapted(&self, thresholds: &BTreeMap<String, f64>) {
        info!(
            event = "thresholds_adapted",
            node = %self.node_name,
            thresholds = ?thresholds,
            "Adaptive thresholds updated"
        );
    }

    /// Log a predictor training pass
    pub fn log_predictor_trained(&self, samples: usize, accuracy: f64, weights: &[f64]) {
        info!(
            event = "predictor_trained",
            node = %self.node_name,
            samples = samples,
            accuracy = accuracy,
            weights = ?weights,
            "Optimization predictor trained"
        );
    }

    /// Log controller startup
    pub fn log_startup(&self, version: &str) {
        info!(
            event = "controller_started",
            node = %self.node_name,
            version = %version,
            "Workload controller started"
        );
    }

    /// Log controller shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Workload controller shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_metrics_creation() {
        let metrics = ControlMetrics::new();

        metrics.observe_task_latency(0.001);
        metrics.set_tasks_in_flight(2);
        metrics.inc_tasks_succeeded();
        metrics.record_strategy_execution("Memory Optimization", true);
        metrics.set_adaptive_threshold("cpu", 70.0);
        metrics.set_predictor_accuracy(0.75);

        // A second handle shares the registered collectors
        let again = ControlMetrics::new();
        again.inc_tasks_failed();
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-node");
        assert_eq!(logger.node_name(), "test-node");
    }
}
