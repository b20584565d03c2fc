//! Bounded task execution
//!
//! Runs caller-submitted work under a concurrency cap, retries failures
//! with exponential backoff, keeps operational metrics and periodically
//! scans them for bottlenecks.

mod bottleneck;
mod ledger;

pub use bottleneck::{
    adapt_threshold, clamp_threshold, format_percent, scan, select_rule, ScanSignals,
    MAX_ADAPTIVE_THRESHOLD, MIN_ADAPTIVE_THRESHOLD,
};
pub use ledger::{MetricsLedger, DOWNTIME_PER_ATTEMPT_MS, THROUGHPUT_WINDOW};

use crate::config::{backoff_delay, ConfigError, ExecutorConfig, RuleAction};
use crate::events::{EventBus, NamedEvent};
use crate::models::{OperationalMetrics, Priority, Resource, ResourceUsage, TaskMetadata};
use crate::observability::{ControlMetrics, StructuredLogger};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Semaphore, SemaphorePermit, TryAcquireError};
use tokio::time::interval;
use tracing::{debug, info};

/// Task names idle longer than this are dropped by metric compaction
pub const STALE_TASK_AFTER: Duration = Duration::from_secs(600);

/// Errors surfaced to task submitters
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("task {name} failed after {attempts} attempts: {source}")]
    TaskFailed {
        name: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
    #[error("executor has been shut down")]
    ShutDown,
}

/// Per-submission options
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub priority: Priority,
    pub category: Option<String>,
    /// Falls back to the executor's configured default when unset
    pub max_retries: Option<u32>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Request raised when a response rule fires
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationRequest {
    pub action: RuleAction,
    /// Utilization as a fraction of the cap
    pub utilization: f64,
    pub threshold: f64,
    pub bottlenecks: Vec<String>,
    pub priority: i32,
}

/// Notifications emitted by the executor
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorEvent {
    QueueFull { size: usize, wait_time_ms: f64 },
    BottleneckDetected(Vec<String>),
    OptimizationNeeded(OptimizationRequest),
}

impl NamedEvent for ExecutorEvent {
    fn name(&self) -> &'static str {
        match self {
            ExecutorEvent::QueueFull { .. } => "queue-full",
            ExecutorEvent::BottleneckDetected(_) => "bottleneck-detected",
            ExecutorEvent::OptimizationNeeded(_) => "optimization-needed",
        }
    }
}

struct ExecutorInner {
    config: ExecutorConfig,
    slots: Semaphore,
    cap: AtomicUsize,
    in_flight: AtomicUsize,
    waiting: AtomicUsize,
    next_id: AtomicU64,
    tasks: DashMap<u64, TaskMetadata>,
    ledger: Mutex<MetricsLedger>,
    thresholds: Mutex<BTreeMap<Resource, f64>>,
    rules_fired: Mutex<HashMap<RuleAction, Instant>>,
    throttle_until: Mutex<Option<Instant>>,
    events: EventBus<ExecutorEvent>,
    metrics: ControlMetrics,
    logger: StructuredLogger,
}

/// Bounded task executor
///
/// Cheap to clone; clones share the same slots, metrics and subscribers.
#[derive(Clone)]
pub struct TaskExecutor {
    inner: Arc<ExecutorInner>,
}

impl TaskExecutor {
    /// Create a new executor; invalid configuration is rejected here
    pub fn new(config: ExecutorConfig) -> Result<Self, ConfigError> {
        Self::with_logger(config, StructuredLogger::default())
    }

    pub fn with_logger(config: ExecutorConfig, logger: StructuredLogger) -> Result<Self, ConfigError> {
        config.validate()?;

        // Only percent resources adapt; network keeps its static KB/s limit
        let mut thresholds = BTreeMap::new();
        if config.adaptive_thresholds {
            thresholds.insert(Resource::Cpu, config.resource_limits.cpu);
            thresholds.insert(Resource::Memory, config.resource_limits.memory);
        }

        let cap = config.max_concurrent_tasks;
        let metrics = ControlMetrics::new();
        metrics.set_concurrency_cap(cap);

        Ok(Self {
            inner: Arc::new(ExecutorInner {
                slots: Semaphore::new(cap),
                cap: AtomicUsize::new(cap),
                in_flight: AtomicUsize::new(0),
                waiting: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
                tasks: DashMap::new(),
                ledger: Mutex::new(MetricsLedger::new()),
                thresholds: Mutex::new(thresholds),
                rules_fired: Mutex::new(HashMap::new()),
                throttle_until: Mutex::new(None),
                events: EventBus::new(),
                metrics,
                logger,
                config,
            }),
        })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ExecutorEvent> {
        self.inner.events.subscribe()
    }

    /// Run `work` under the concurrency cap, retrying failures
    ///
    /// Blocks while every slot is taken. `work` is invoked once per attempt;
    /// at most `max_retries + 1` attempts are made before the last error is
    /// returned.
    pub async fn submit<T, F, Fut>(
        &self,
        name: &str,
        options: TaskOptions,
        mut work: F,
    ) -> Result<T, ExecutorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let inner = &self.inner;
        let category = options.category.unwrap_or_else(|| "default".to_string());
        let max_retries = options
            .max_retries
            .unwrap_or(inner.config.default_max_retries);

        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        inner.tasks.insert(
            id,
            TaskMetadata {
                name: name.to_string(),
                priority: options.priority,
                category: category.clone(),
                started_at: chrono::Utc::now(),
                attempts: 0,
                max_retries,
                last_error: None,
            },
        );
        let _task = TaskGuard { inner, id };
        self.ledger().register_task(name, &category);

        let priorities = &inner.config.task_priorities;
        let weight = priorities.weight(options.priority);
        if weight <= priorities.low && self.is_throttled() {
            debug!(task = %name, weight, "Delaying low-priority task while throttled");
            tokio::time::sleep(Duration::from_millis(inner.config.throttle_delay_ms)).await;
        }

        let _permit = self.acquire_slot().await?;
        let _slot = SlotGuard::enter(inner);

        loop {
            let started = Instant::now();
            match work().await {
                Ok(value) => {
                    let elapsed = started.elapsed();
                    self.record_success(name, elapsed);
                    return Ok(value);
                }
                Err(error) => {
                    let attempts = self.mark_attempt_failed(id, &error);
                    if attempts > max_retries {
                        self.record_failure(name, &category, attempts, &error);
                        return Err(ExecutorError::TaskFailed {
                            name: name.to_string(),
                            attempts,
                            source: error,
                        });
                    }

                    let delay = backoff_delay(
                        inner.config.retry_base_delay(),
                        attempts,
                        inner.config.max_retry_delay(),
                    );
                    debug!(
                        task = %name,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Task attempt failed, retrying"
                    );
                    inner.metrics.inc_task_retries();
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn acquire_slot(&self) -> Result<SemaphorePermit<'_>, ExecutorError> {
        let inner = &self.inner;
        match inner.slots.try_acquire() {
            Ok(permit) => Ok(permit),
            Err(TryAcquireError::Closed) => Err(ExecutorError::ShutDown),
            Err(TryAcquireError::NoPermits) => {
                let size = self.in_flight();
                let wait_time_ms = self.average_wait_ms();
                debug!(size, wait_time_ms, "Concurrency cap reached, waiting for a slot");
                inner.metrics.inc_queue_full();
                inner
                    .events
                    .emit(ExecutorEvent::QueueFull { size, wait_time_ms });

                let _waiting = WaitGuard::enter(inner);
                inner
                    .slots
                    .acquire()
                    .await
                    .map_err(|_| ExecutorError::ShutDown)
            }
        }
    }

    fn mark_attempt_failed(&self, id: u64, error: &anyhow::Error) -> u32 {
        match self.inner.tasks.get_mut(&id) {
            Some(mut metadata) => {
                metadata.attempts += 1;
                metadata.last_error = Some(error.to_string());
                metadata.attempts
            }
            None => 1,
        }
    }

    fn record_success(&self, name: &str, elapsed: Duration) {
        let inner = &self.inner;
        let downtime_ms = self.downtime_proxy_ms();
        {
            let mut ledger = self.ledger();
            ledger.record_success(
                name,
                elapsed.as_secs_f64() * 1000.0,
                self.in_flight(),
                self.concurrency_cap(),
                downtime_ms,
            );
            ledger.record_completion();
        }
        inner.metrics.observe_task_latency(elapsed.as_secs_f64());
        inner.metrics.inc_tasks_succeeded();
    }

    fn record_failure(&self, name: &str, category: &str, attempts: u32, error: &anyhow::Error) {
        let inner = &self.inner;
        {
            let mut ledger = self.ledger();
            ledger.record_failure(name);
            ledger.record_completion();
        }
        inner.metrics.inc_tasks_failed();
        inner
            .logger
            .log_task_failed(name, category, attempts, &error.to_string());
    }

    /// Sum of the attempts-driven downtime proxy over in-flight tasks
    fn downtime_proxy_ms(&self) -> f64 {
        self.inner
            .tasks
            .iter()
            .filter(|entry| entry.last_error.is_some())
            .map(|entry| entry.attempts as f64 * DOWNTIME_PER_ATTEMPT_MS)
            .sum()
    }

    /// Mean age of tracked tasks in milliseconds
    pub fn average_wait_ms(&self) -> f64 {
        let now = chrono::Utc::now();
        let ages: Vec<f64> = self
            .inner
            .tasks
            .iter()
            .map(|entry| (now - entry.started_at).num_milliseconds().max(0) as f64)
            .collect();
        if ages.is_empty() {
            return 0.0;
        }
        ages.iter().sum::<f64>() / ages.len() as f64
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn waiting(&self) -> usize {
        self.inner.waiting.load(Ordering::SeqCst)
    }

    /// Tasks holding or waiting for a slot
    pub fn queue_size(&self) -> usize {
        self.in_flight() + self.waiting()
    }

    pub fn concurrency_cap(&self) -> usize {
        self.inner.cap.load(Ordering::SeqCst)
    }

    /// Metadata for a live task with the given name
    pub fn task_metadata(&self, name: &str) -> Option<TaskMetadata> {
        self.inner
            .tasks
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.value().clone())
    }

    /// Read-only snapshot of the operational metrics
    pub fn metrics(&self) -> OperationalMetrics {
        self.ledger().snapshot()
    }

    /// Feed the latest host resource observation into the cost metrics
    pub fn observe_resources(&self, usage: ResourceUsage) {
        self.ledger().observe_usage(usage);
    }

    /// Current bottleneck thresholds (adaptive when enabled)
    pub fn thresholds(&self) -> BTreeMap<Resource, f64> {
        let limits = &self.inner.config.resource_limits;
        let adaptive = self.lock(&self.inner.thresholds).clone();
        let mut thresholds = BTreeMap::new();
        thresholds.insert(
            Resource::Cpu,
            adaptive.get(&Resource::Cpu).copied().unwrap_or(limits.cpu),
        );
        thresholds.insert(
            Resource::Memory,
            adaptive
                .get(&Resource::Memory)
                .copied()
                .unwrap_or(limits.memory),
        );
        thresholds
    }

    /// Scan the current metrics for bottlenecks and fire at most one rule
    pub fn detect_bottlenecks(&self) -> Vec<String> {
        let inner = &self.inner;
        let thresholds = self.thresholds();
        let cap = self.concurrency_cap();
        let average_wait_ms = self.average_wait_ms();

        let signals = {
            let mut ledger = self.ledger();
            ledger.set_utilization(self.in_flight(), cap);
            let current_throughput = ledger.current_throughput();
            let metrics = ledger.metrics();
            ScanSignals {
                utilization: metrics.resource_utilization,
                cpu_threshold: thresholds[&Resource::Cpu],
                memory_usage: metrics.cost_metrics.memory_usage,
                memory_threshold: thresholds[&Resource::Memory],
                network_usage: metrics.cost_metrics.network_usage,
                network_limit: inner.config.resource_limits.network,
                pending_tasks: self.queue_size(),
                concurrency_cap: cap,
                average_wait_ms,
                errors_by_category: ledger.errors_by_category(),
                current_throughput,
                historical_throughput: metrics.throughput.tasks_per_second,
            }
        };
        let bottlenecks = scan(&signals);
        if bottlenecks.is_empty() {
            return bottlenecks;
        }

        inner.metrics.add_bottlenecks(bottlenecks.len());
        inner.logger.log_bottlenecks(&bottlenecks);
        inner
            .events
            .emit(ExecutorEvent::BottleneckDetected(bottlenecks.clone()));
        self.apply_rules(signals.utilization, &bottlenecks);

        bottlenecks
    }

    fn apply_rules(&self, utilization: f64, bottlenecks: &[String]) {
        let inner = &self.inner;
        let now = Instant::now();
        let request = {
            let mut fired = self.lock(&inner.rules_fired);
            let Some(rule) = select_rule(&inner.config.optimization_rules, utilization, &fired, now)
            else {
                return;
            };
            fired.insert(rule.action, now);
            OptimizationRequest {
                action: rule.action,
                utilization: utilization / 100.0,
                threshold: rule.threshold,
                bottlenecks: bottlenecks.to_vec(),
                priority: rule.priority,
            }
        };

        info!(
            action = %request.action,
            utilization = request.utilization,
            threshold = request.threshold,
            "Response rule fired"
        );
        inner.events.emit(ExecutorEvent::OptimizationNeeded(request));
    }

    /// Nudge the executor's adaptive thresholds from the performance score
    pub fn update_adaptive_thresholds(&self) -> BTreeMap<Resource, f64> {
        let (score, utilization) = {
            let ledger = self.ledger();
            let metrics = ledger.metrics();
            (
                metrics.quality_metrics.performance_score,
                metrics.resource_utilization,
            )
        };

        let mut thresholds = self.lock(&self.inner.thresholds);
        for threshold in thresholds.values_mut() {
            *threshold = adapt_threshold(*threshold, score, utilization);
        }
        debug!(thresholds = ?*thresholds, "Executor thresholds adapted");
        thresholds.clone()
    }

    /// Reclaim per-task bookkeeping for idle task names
    pub fn compact_metrics(&self) -> usize {
        let removed = self.ledger().compact(STALE_TASK_AFTER);
        debug!(removed, "Compacted executor metrics");
        removed
    }

    /// Delay admission of low-priority work for `window`
    pub fn throttle_low_priority(&self, window: Duration) {
        *self.lock(&self.inner.throttle_until) = Some(Instant::now() + window);
        info!(window_ms = window.as_millis() as u64, "Throttling low-priority tasks");
    }

    pub fn is_throttled(&self) -> bool {
        let until = *self.lock(&self.inner.throttle_until);
        until.map_or(false, |until| Instant::now() < until)
    }

    /// Resize the concurrency cap to `ceil(base * factor)`
    ///
    /// Only active with auto scaling; the cap stays within
    /// `[max_concurrent_tasks, max_scaled_tasks]`. Shrinking only reclaims
    /// idle slots, so in-flight work is never exceeded. Returns the new cap.
    pub fn apply_scaling(&self, factor: f64) -> usize {
        let inner = &self.inner;
        let current = self.concurrency_cap();
        if !inner.config.auto_scaling || !factor.is_finite() {
            return current;
        }

        let base = inner.config.max_concurrent_tasks;
        let target = ((base as f64 * factor).ceil() as usize).clamp(base, inner.config.max_scaled_tasks);

        let new_cap = if target > current {
            inner.slots.add_permits(target - current);
            target
        } else if target < current {
            current - inner.slots.forget_permits(current - target)
        } else {
            current
        };

        if new_cap != current {
            inner.cap.store(new_cap, Ordering::SeqCst);
            inner.metrics.set_concurrency_cap(new_cap);
            info!(from = current, to = new_cap, factor, "Concurrency cap rescaled");
        }
        new_cap
    }

    /// Run the periodic bottleneck scan and threshold adaptation
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let config = &self.inner.config;
        info!(
            scan_interval_secs = config.bottleneck_scan_interval_secs,
            cap = config.max_concurrent_tasks,
            "Starting task executor background loop"
        );

        let mut scan_ticker = interval(Duration::from_secs(config.bottleneck_scan_interval_secs));
        let mut threshold_ticker =
            interval(Duration::from_secs(config.threshold_update_interval_secs));
        // Skip the immediate first tick, thresholds start from configuration
        threshold_ticker.tick().await;

        loop {
            tokio::select! {
                _ = scan_ticker.tick() => {
                    self.detect_bottlenecks();
                }
                _ = threshold_ticker.tick(), if config.adaptive_thresholds => {
                    self.update_adaptive_thresholds();
                }
                _ = shutdown.recv() => {
                    info!("Shutting down task executor background loop");
                    break;
                }
            }
        }
    }

    /// Stop admitting work and release every subscription
    pub fn cleanup(&self) {
        self.inner.slots.close();
        self.inner.events.close();
    }

    fn ledger(&self) -> MutexGuard<'_, MetricsLedger> {
        self.lock(&self.inner.ledger)
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Removes task metadata however the submission ends
struct TaskGuard<'a> {
    inner: &'a ExecutorInner,
    id: u64,
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        self.inner.tasks.remove(&self.id);
    }
}

/// Counts a submission blocked on a slot, including ones dropped mid-wait
struct WaitGuard<'a> {
    inner: &'a ExecutorInner,
}

impl<'a> WaitGuard<'a> {
    fn enter(inner: &'a ExecutorInner) -> Self {
        inner.waiting.fetch_add(1, Ordering::SeqCst);
        Self { inner }
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.inner.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Tracks slot occupancy while a task holds a permit
struct SlotGuard<'a> {
    inner: &'a ExecutorInner,
}

impl<'a> SlotGuard<'a> {
    fn enter(inner: &'a ExecutorInner) -> Self {
        let now = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.metrics.set_tasks_in_flight(now as i64);
        Self { inner }
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let now = self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        self.inner.metrics.set_tasks_in_flight(now as i64);
    }
}
