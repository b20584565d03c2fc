//! Performance optimizer
//!
//! Closes the loop between the monitor and the executor. Every metrics
//! update or bottleneck report may start one optimization cycle: the
//! qualifying strategies run in rank order, each with its own retry and
//! backoff, and every outcome lands in a bounded history. The history
//! trains a small success predictor and drives the adaptive thresholds.

mod mitigation;
mod predictor;
mod strategy;
mod thresholds;

pub use mitigation::{
    ExecutorMitigation, Mitigation, MitigationContext, DEFAULT_THROTTLE_WINDOW,
    MITIGATION_CATEGORY,
};
pub use predictor::{
    features, Features, OnlinePredictor, TrainingSample, ACCURACY_WINDOW, MIN_TRAINING_SAMPLES,
};
pub use strategy::{rank, MetricsView, Strategy, StrategyKind, StrategyStats, QUEUE_SIZE_TRIGGER};
pub use thresholds::{adjustment, recent_success_rate, AdaptiveThresholds, RECENT_WINDOW};

use crate::config::{backoff_delay, ConfigError, OptimizerConfig, RuleAction};
use crate::events::{EventBus, NamedEvent};
use crate::executor::{ExecutorEvent, OptimizationRequest, TaskExecutor};
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::{OperationalMetrics, ResourceSnapshot};
use crate::monitor::{MonitorEvent, SystemMonitor};
use crate::observability::{ControlMetrics, StructuredLogger};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Immutable record of one strategy execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationResult {
    pub strategy: String,
    pub success: bool,
    pub before: ResourceSnapshot,
    pub after: ResourceSnapshot,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Notifications emitted by the optimizer
#[derive(Debug, Clone, PartialEq)]
pub enum OptimizerEvent {
    OptimizationStarted(String),
    OptimizationCompleted {
        strategy: String,
        success: bool,
    },
    OptimizationError {
        strategy: String,
        error: String,
        attempts: u32,
    },
    BottleneckDetected(Vec<String>),
    Scale {
        factor: f64,
    },
}

impl NamedEvent for OptimizerEvent {
    fn name(&self) -> &'static str {
        match self {
            OptimizerEvent::OptimizationStarted(_) => "optimization-started",
            OptimizerEvent::OptimizationCompleted { .. } => "optimization-completed",
            OptimizerEvent::OptimizationError { .. } => "optimization-error",
            OptimizerEvent::BottleneckDetected(_) => "bottleneck-detected",
            OptimizerEvent::Scale { .. } => "scale",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub weights: Vec<f64>,
    pub bias: f64,
    pub accuracy: f64,
}

/// Point-in-time view returned by [`PerformanceOptimizer::get_optimization_status`]
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationStatus {
    pub is_optimizing: bool,
    pub system_metrics: ResourceSnapshot,
    pub operational_metrics: OperationalMetrics,
    pub active_strategies: Vec<StrategyStats>,
    pub adaptive_thresholds: BTreeMap<String, f64>,
    pub model: ModelStatus,
}

struct OptimizerState {
    strategies: Vec<Strategy>,
    history: VecDeque<OptimizationResult>,
    thresholds: AdaptiveThresholds,
    predictor: OnlinePredictor,
}

impl OptimizerState {
    fn training_samples(&self) -> Vec<TrainingSample> {
        self.history
            .iter()
            .map(|result| (features(&result.before), result.success))
            .collect()
    }
}

struct OptimizerInner {
    config: OptimizerConfig,
    executor: TaskExecutor,
    monitor: SystemMonitor,
    mitigation: Arc<dyn Mitigation>,
    state: Mutex<OptimizerState>,
    optimizing: AtomicBool,
    events: EventBus<OptimizerEvent>,
    health: HealthRegistry,
    metrics: ControlMetrics,
    logger: StructuredLogger,
}

/// Strategy-driven optimizer over an executor and a monitor
#[derive(Clone)]
pub struct PerformanceOptimizer {
    inner: Arc<OptimizerInner>,
}

impl PerformanceOptimizer {
    /// Optimizer whose mitigations run as tasks on `executor`
    pub fn new(
        config: OptimizerConfig,
        executor: TaskExecutor,
        monitor: SystemMonitor,
    ) -> Result<Self, ConfigError> {
        Self::new_with_health(
            config,
            executor,
            monitor,
            HealthRegistry::new(),
            StructuredLogger::default(),
        )
    }

    pub fn new_with_health(
        config: OptimizerConfig,
        executor: TaskExecutor,
        monitor: SystemMonitor,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Result<Self, ConfigError> {
        let mitigation = Arc::new(ExecutorMitigation::new(executor.clone()));
        Self::with_mitigation(config, executor, monitor, mitigation, health, logger)
    }

    pub fn with_mitigation(
        config: OptimizerConfig,
        executor: TaskExecutor,
        monitor: SystemMonitor,
        mitigation: Arc<dyn Mitigation>,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let predictor = OnlinePredictor::from_config(&config)?;
        let state = OptimizerState {
            strategies: StrategyKind::ALL.into_iter().map(Strategy::new).collect(),
            history: VecDeque::with_capacity(config.max_history_size.min(1024)),
            thresholds: AdaptiveThresholds::new(),
            predictor,
        };

        Ok(Self {
            inner: Arc::new(OptimizerInner {
                config,
                executor,
                monitor,
                mitigation,
                state: Mutex::new(state),
                optimizing: AtomicBool::new(false),
                events: EventBus::new(),
                health,
                metrics: ControlMetrics::new(),
                logger,
            }),
        })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<OptimizerEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_optimizing(&self) -> bool {
        self.inner.optimizing.load(Ordering::SeqCst)
    }

    /// Override a strategy's cooldown
    pub fn set_strategy_cooldown(&self, kind: StrategyKind, cooldown: Duration) {
        let mut state = self.state();
        if let Some(strategy) = state.strategies.iter_mut().find(|s| s.kind == kind) {
            strategy.cooldown = cooldown;
        }
    }

    /// React to a new monitor snapshot; returns the number of strategies run
    pub async fn handle_metrics_update(&self, snapshot: &ResourceSnapshot) -> usize {
        let executor = &self.inner.executor;
        executor.observe_resources(snapshot.usage());

        let view = MetricsView::from_snapshot(snapshot, executor.queue_size());
        self.run_cycle(|kind, thresholds| kind.applies(&view, thresholds))
            .await
    }

    /// Re-publish bottlenecks and run the strategies they name
    pub async fn handle_bottleneck(&self, bottlenecks: Vec<String>) -> usize {
        self.inner
            .events
            .emit(OptimizerEvent::BottleneckDetected(bottlenecks.clone()));
        self.run_matching(&bottlenecks).await
    }

    /// Act on a response rule fired by the executor
    pub async fn handle_optimization_needed(&self, request: OptimizationRequest) -> usize {
        match request.action {
            RuleAction::Scale => {
                let factor = self.scaling_factor();
                self.inner.events.emit(OptimizerEvent::Scale { factor });
                self.run_cycle(|kind, _| kind == StrategyKind::PredictiveScaling)
                    .await
            }
            RuleAction::Optimize => self.run_matching(&request.bottlenecks).await,
            RuleAction::Alert => {
                warn!(
                    utilization = request.utilization,
                    threshold = request.threshold,
                    bottlenecks = ?request.bottlenecks,
                    "Executor utilization alert"
                );
                0
            }
        }
    }

    async fn run_matching(&self, bottlenecks: &[String]) -> usize {
        self.run_cycle(|kind, _| bottlenecks.iter().any(|b| kind.matches_bottleneck(b)))
            .await
    }

    /// One optimization cycle over the strategies accepted by `select`
    ///
    /// A no-op while another cycle is running.
    async fn run_cycle<F>(&self, select: F) -> usize
    where
        F: Fn(StrategyKind, &AdaptiveThresholds) -> bool,
    {
        let Some(_cycle) = CycleGuard::try_enter(&self.inner.optimizing) else {
            debug!("Optimization cycle already running, skipping");
            return 0;
        };

        let selected: Vec<StrategyKind> = {
            let state = self.state();
            let now = Instant::now();
            let mut candidates: Vec<&Strategy> = state
                .strategies
                .iter()
                .filter(|s| s.off_cooldown(now) && select(s.kind, &state.thresholds))
                .collect();
            rank(&mut candidates);
            candidates.into_iter().map(|s| s.kind).collect()
        };

        if selected.is_empty() {
            return 0;
        }

        self.inner.metrics.inc_optimization_cycles();
        debug!(strategies = ?selected, "Starting optimization cycle");
        for kind in &selected {
            self.execute_strategy(*kind).await;
        }
        selected.len()
    }

    async fn execute_strategy(&self, kind: StrategyKind) -> bool {
        let inner = &self.inner;
        let name = kind.name();
        let before = inner.monitor.get_metrics();
        let context = MitigationContext {
            scaling_factor: self.state().predictor.scaling_factor(&before),
        };

        inner
            .events
            .emit(OptimizerEvent::OptimizationStarted(name.to_string()));
        info!(strategy = %name, "Executing optimization strategy");

        let started = Instant::now();
        let outcome = self.execute_with_retry(kind, context).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        let success = outcome.is_ok();

        if let Err((error, attempts)) = outcome {
            inner.events.emit(OptimizerEvent::OptimizationError {
                strategy: name.to_string(),
                error: error.to_string(),
                attempts,
            });
            inner
                .health
                .set_degraded(components::OPTIMIZER, format!("{} failed: {}", name, error))
                .await;
        } else if inner.health.status_of(components::OPTIMIZER).await
            == Some(ComponentStatus::Degraded)
        {
            inner.health.set_healthy(components::OPTIMIZER).await;
        }

        let after = inner.monitor.get_metrics();
        {
            let mut state = self.state();
            if let Some(strategy) = state.strategies.iter_mut().find(|s| s.kind == kind) {
                strategy.record(success);
                strategy.mark_executed(Instant::now());
            }
            state.history.push_back(OptimizationResult {
                strategy: name.to_string(),
                success,
                before,
                after,
                timestamp: Utc::now(),
                duration_ms,
            });
            while state.history.len() > inner.config.max_history_size {
                state.history.pop_front();
            }
        }

        inner.metrics.record_strategy_execution(name, success);
        inner.logger.log_optimization(name, success, duration_ms);
        inner.events.emit(OptimizerEvent::OptimizationCompleted {
            strategy: name.to_string(),
            success,
        });
        success
    }

    /// Apply a mitigation, retrying with capped exponential backoff
    ///
    /// On exhaustion returns the last error and the number of attempts made.
    async fn execute_with_retry(
        &self,
        kind: StrategyKind,
        context: MitigationContext,
    ) -> Result<(), (anyhow::Error, u32)> {
        let config = &self.inner.config;
        let mut attempt = 1;
        loop {
            match self.inner.mitigation.apply(kind, context).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < config.max_strategy_attempts => {
                    let delay =
                        backoff_delay(config.retry_base_delay(), attempt, config.max_retry_delay());
                    debug!(
                        strategy = %kind,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Strategy attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err((e, attempt)),
            }
        }
    }

    /// Capacity multiplier for the current host snapshot
    pub fn scaling_factor(&self) -> f64 {
        let snapshot = self.inner.monitor.get_metrics();
        self.state().predictor.scaling_factor(&snapshot)
    }

    /// Recompute the adaptive thresholds from history and the forecast
    pub fn update_adaptive_thresholds(&self) -> BTreeMap<String, f64> {
        let prediction = self.inner.monitor.get_predictions();
        let thresholds = {
            let mut guard = self.state();
            let state = &mut *guard;
            state.thresholds.update(state.history.iter(), &prediction);
            state.thresholds.as_map()
        };

        for (resource, value) in &thresholds {
            self.inner.metrics.set_adaptive_threshold(resource, *value);
        }
        self.inner.logger.log_thresholds_adapted(&thresholds);
        thresholds
    }

    /// One training pass over the history; `None` below the minimum size
    pub fn train_predictor(&self) -> Option<f64> {
        let (samples, accuracy, weights) = {
            let mut state = self.state();
            let samples = state.training_samples();
            if !state.predictor.train(&samples) {
                debug!(samples = samples.len(), "Not enough history to train predictor");
                return None;
            }
            let accuracy = state.predictor.accuracy(&samples);
            (samples.len(), accuracy, state.predictor.weights())
        };

        self.inner.metrics.set_predictor_accuracy(accuracy);
        self.inner
            .logger
            .log_predictor_trained(samples, accuracy, &weights);
        Some(accuracy)
    }

    pub fn get_optimization_status(&self) -> OptimizationStatus {
        let system_metrics = self.inner.monitor.get_metrics();
        let operational_metrics = self.inner.executor.metrics();
        let state = self.state();
        let samples = state.training_samples();

        OptimizationStatus {
            is_optimizing: self.is_optimizing(),
            system_metrics,
            operational_metrics,
            active_strategies: state.strategies.iter().map(Strategy::stats).collect(),
            adaptive_thresholds: state.thresholds.as_map(),
            model: ModelStatus {
                weights: state.predictor.weights().to_vec(),
                bias: state.predictor.bias(),
                accuracy: state.predictor.accuracy(&samples),
            },
        }
    }

    /// Results, most recent last
    pub fn get_optimization_history(&self) -> Vec<OptimizationResult> {
        self.state().history.iter().cloned().collect()
    }

    /// Run predictor training and threshold adaptation until shutdown
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let config = &self.inner.config;
        info!(
            training_interval_secs = config.training_interval_secs,
            threshold_interval_secs = config.threshold_update_interval_secs,
            "Starting performance optimizer"
        );

        let mut training_ticker = interval(Duration::from_secs(config.training_interval_secs));
        let mut threshold_ticker =
            interval(Duration::from_secs(config.threshold_update_interval_secs));
        training_ticker.tick().await;
        threshold_ticker.tick().await;

        loop {
            tokio::select! {
                _ = training_ticker.tick() => {
                    self.train_predictor();
                }
                _ = threshold_ticker.tick() => {
                    self.update_adaptive_thresholds();
                }
                _ = shutdown.recv() => {
                    info!("Shutting down performance optimizer");
                    break;
                }
            }
        }
    }

    /// Feed monitor and executor notifications into the optimizer
    ///
    /// Each notification is handled on its own task so a running cycle
    /// never delays delivery; overlapping cycles are rejected by the
    /// cycle guard.
    pub async fn run_event_pump(
        self,
        mut monitor_events: mpsc::UnboundedReceiver<MonitorEvent>,
        mut executor_events: mpsc::UnboundedReceiver<ExecutorEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut handlers = JoinSet::new();
        loop {
            tokio::select! {
                Some(event) = monitor_events.recv() => {
                    let optimizer = self.clone();
                    handlers.spawn(async move { optimizer.on_monitor_event(event).await });
                }
                Some(event) = executor_events.recv() => {
                    let optimizer = self.clone();
                    handlers.spawn(async move { optimizer.on_executor_event(event).await });
                }
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Optimizer event handler panicked");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Stopping optimizer event pump");
                    break;
                }
                else => break,
            }
        }
        handlers.shutdown().await;
    }

    async fn on_monitor_event(&self, event: MonitorEvent) {
        match event {
            MonitorEvent::MetricsUpdate(snapshot) => {
                self.handle_metrics_update(&snapshot).await;
            }
            MonitorEvent::SystemAlerts(alerts) => {
                debug!(alerts = ?alerts, "System alerts received");
            }
            MonitorEvent::MonitoringError(error) => {
                debug!(error = %error, "Monitor reported a sampling error");
            }
        }
    }

    async fn on_executor_event(&self, event: ExecutorEvent) {
        match event {
            ExecutorEvent::QueueFull { size, wait_time_ms } => {
                debug!(size, wait_time_ms, "Executor queue full");
            }
            ExecutorEvent::BottleneckDetected(bottlenecks) => {
                self.handle_bottleneck(bottlenecks).await;
            }
            ExecutorEvent::OptimizationNeeded(request) => {
                self.handle_optimization_needed(request).await;
            }
        }
    }

    /// Release every subscription
    pub fn cleanup(&self) {
        self.inner.events.close();
    }

    fn state(&self) -> MutexGuard<'_, OptimizerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Holds the optimizing flag for the duration of a cycle
struct CycleGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> CycleGuard<'a> {
    fn try_enter(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExecutorConfig, MonitorConfig};
    use crate::models::MemoryStats;
    use crate::monitor::ScriptedProbe;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, AtomicUsize};

    /// Mitigation that records calls and fails a configured number of times
    #[derive(Default)]
    struct RecordingMitigation {
        calls: Mutex<Vec<StrategyKind>>,
        failures_left: AtomicU32,
        running: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl RecordingMitigation {
        fn failing(times: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(times),
                ..Default::default()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<StrategyKind> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Mitigation for RecordingMitigation {
        async fn apply(&self, strategy: StrategyKind, _context: MitigationContext) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(strategy);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failing {
                Err(anyhow!("mitigation refused"))
            } else {
                Ok(())
            }
        }
    }

    fn fast_config() -> OptimizerConfig {
        OptimizerConfig {
            retry_base_delay_ms: 1,
            max_retry_delay_ms: 5,
            ..Default::default()
        }
    }

    fn optimizer_with(
        config: OptimizerConfig,
        mitigation: Arc<RecordingMitigation>,
        health: HealthRegistry,
    ) -> PerformanceOptimizer {
        let executor = TaskExecutor::new(ExecutorConfig::default()).unwrap();
        let monitor =
            SystemMonitor::new(MonitorConfig::default(), Arc::new(ScriptedProbe::new())).unwrap();
        PerformanceOptimizer::with_mitigation(
            config,
            executor,
            monitor,
            mitigation,
            health,
            StructuredLogger::default(),
        )
        .unwrap()
    }

    fn memory_pressure(percentage: f64) -> ResourceSnapshot {
        ResourceSnapshot {
            memory: MemoryStats {
                total: 100,
                used: percentage as u64,
                free: 100 - percentage as u64,
                percentage,
            },
            ..Default::default()
        }
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<OptimizerEvent>) -> Vec<OptimizerEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    #[tokio::test]
    async fn test_memory_pressure_runs_memory_strategy() {
        let mitigation = Arc::new(RecordingMitigation::default());
        let optimizer = optimizer_with(fast_config(), mitigation.clone(), HealthRegistry::new());
        let mut events = optimizer.subscribe();

        assert_eq!(optimizer.handle_metrics_update(&memory_pressure(95.0)).await, 1);

        assert_eq!(mitigation.calls(), vec![StrategyKind::Memory]);
        assert_eq!(
            drain(&mut events),
            vec![
                OptimizerEvent::OptimizationStarted("Memory Optimization".to_string()),
                OptimizerEvent::OptimizationCompleted {
                    strategy: "Memory Optimization".to_string(),
                    success: true,
                },
            ]
        );

        let history = optimizer.get_optimization_history();
        assert_eq!(history.len(), 1);
        assert!(history[0].success);
        assert!(!optimizer.is_optimizing());
    }

    #[tokio::test]
    async fn test_below_threshold_is_idle() {
        let mitigation = Arc::new(RecordingMitigation::default());
        let optimizer = optimizer_with(fast_config(), mitigation.clone(), HealthRegistry::new());

        assert_eq!(optimizer.handle_metrics_update(&memory_pressure(60.0)).await, 0);
        assert!(mitigation.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cooldown_blocks_immediate_rerun() {
        let mitigation = Arc::new(RecordingMitigation::default());
        let optimizer = optimizer_with(fast_config(), mitigation.clone(), HealthRegistry::new());

        assert_eq!(optimizer.handle_metrics_update(&memory_pressure(95.0)).await, 1);
        assert_eq!(optimizer.handle_metrics_update(&memory_pressure(95.0)).await, 0);

        optimizer.set_strategy_cooldown(StrategyKind::Memory, Duration::ZERO);
        assert_eq!(optimizer.handle_metrics_update(&memory_pressure(95.0)).await, 1);
    }

    #[tokio::test]
    async fn test_cycles_never_overlap() {
        let mitigation = Arc::new(RecordingMitigation::slow(Duration::from_millis(20)));
        let optimizer = optimizer_with(fast_config(), mitigation.clone(), HealthRegistry::new());
        optimizer.set_strategy_cooldown(StrategyKind::Memory, Duration::ZERO);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let optimizer = optimizer.clone();
            handles.push(tokio::spawn(async move {
                optimizer.handle_metrics_update(&memory_pressure(95.0)).await
            }));
        }

        let mut executed = 0;
        for handle in handles {
            executed += handle.await.unwrap();
        }

        assert_eq!(mitigation.peak.load(Ordering::SeqCst), 1);
        assert!(executed >= 1);
        assert!(executed < 10);
        assert_eq!(optimizer.get_optimization_history().len(), executed);
    }

    #[tokio::test]
    async fn test_failed_strategy_retries_then_reports() {
        let mitigation = Arc::new(RecordingMitigation::failing(u32::MAX));
        let health = HealthRegistry::for_control_loop().await;
        let optimizer = optimizer_with(fast_config(), mitigation.clone(), health.clone());
        let mut events = optimizer.subscribe();

        assert_eq!(optimizer.handle_metrics_update(&memory_pressure(95.0)).await, 1);

        assert_eq!(mitigation.calls().len(), 3);
        let events = drain(&mut events);
        assert!(events.contains(&OptimizerEvent::OptimizationError {
            strategy: "Memory Optimization".to_string(),
            error: "mitigation refused".to_string(),
            attempts: 3,
        }));
        assert_eq!(
            events.last(),
            Some(&OptimizerEvent::OptimizationCompleted {
                strategy: "Memory Optimization".to_string(),
                success: false,
            })
        );

        let status = optimizer.get_optimization_status();
        let memory = status
            .active_strategies
            .iter()
            .find(|s| s.name == "Memory Optimization")
            .unwrap();
        assert_eq!(memory.success_rate, 0.0);
        assert_eq!(memory.execution_count, 1);
        assert_eq!(
            health.status_of(components::OPTIMIZER).await,
            Some(ComponentStatus::Degraded)
        );
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let mitigation = Arc::new(RecordingMitigation::failing(2));
        let optimizer = optimizer_with(fast_config(), mitigation.clone(), HealthRegistry::new());

        optimizer.handle_metrics_update(&memory_pressure(95.0)).await;

        assert_eq!(mitigation.calls().len(), 3);
        assert!(optimizer.get_optimization_history()[0].success);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let config = OptimizerConfig {
            max_history_size: 3,
            ..fast_config()
        };
        let mitigation = Arc::new(RecordingMitigation::default());
        let optimizer = optimizer_with(config, mitigation, HealthRegistry::new());
        optimizer.set_strategy_cooldown(StrategyKind::Memory, Duration::ZERO);

        for _ in 0..5 {
            optimizer.handle_metrics_update(&memory_pressure(95.0)).await;
        }

        let history = optimizer.get_optimization_history();
        assert_eq!(history.len(), 3);
        assert!(history
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp));
    }

    #[tokio::test]
    async fn test_successful_runs_raise_threshold() {
        let mitigation = Arc::new(RecordingMitigation::default());
        let optimizer = optimizer_with(fast_config(), mitigation, HealthRegistry::new());
        optimizer.set_strategy_cooldown(StrategyKind::Memory, Duration::ZERO);

        for _ in 0..5 {
            optimizer.handle_metrics_update(&memory_pressure(95.0)).await;
        }
        let thresholds = optimizer.update_adaptive_thresholds();

        assert_eq!(thresholds["memory"], 83.0);
    }

    #[tokio::test]
    async fn test_bottleneck_runs_matching_strategy() {
        let mitigation = Arc::new(RecordingMitigation::default());
        let optimizer = optimizer_with(fast_config(), mitigation.clone(), HealthRegistry::new());
        let mut events = optimizer.subscribe();

        let bottlenecks = vec!["High memory usage: 95%".to_string()];
        assert_eq!(optimizer.handle_bottleneck(bottlenecks.clone()).await, 1);

        assert_eq!(
            events.try_recv().unwrap(),
            OptimizerEvent::BottleneckDetected(bottlenecks)
        );
        assert_eq!(mitigation.calls(), vec![StrategyKind::Memory]);
    }

    #[tokio::test]
    async fn test_response_rule_actions() {
        let mitigation = Arc::new(RecordingMitigation::default());
        let optimizer = optimizer_with(fast_config(), mitigation.clone(), HealthRegistry::new());
        let mut events = optimizer.subscribe();
        let request = |action| OptimizationRequest {
            action,
            utilization: 0.95,
            threshold: 0.9,
            bottlenecks: vec!["High CPU utilization: 95%".to_string()],
            priority: 3,
        };

        assert_eq!(optimizer.handle_optimization_needed(request(RuleAction::Alert)).await, 0);

        assert_eq!(optimizer.handle_optimization_needed(request(RuleAction::Scale)).await, 1);
        match events.try_recv().unwrap() {
            OptimizerEvent::Scale { factor } => assert!((1.0..=1.5).contains(&factor)),
            other => panic!("unexpected event: {:?}", other),
        }

        assert_eq!(
            optimizer
                .handle_optimization_needed(request(RuleAction::Optimize))
                .await,
            1
        );
        assert_eq!(
            mitigation.calls(),
            vec![StrategyKind::PredictiveScaling, StrategyKind::Cpu]
        );
    }

    #[tokio::test]
    async fn test_training_needs_history() {
        let mitigation = Arc::new(RecordingMitigation::default());
        let optimizer = optimizer_with(fast_config(), mitigation, HealthRegistry::new());
        optimizer.set_strategy_cooldown(StrategyKind::Memory, Duration::ZERO);

        assert_eq!(optimizer.train_predictor(), None);

        for _ in 0..MIN_TRAINING_SAMPLES {
            optimizer.handle_metrics_update(&memory_pressure(95.0)).await;
        }
        let before = optimizer.get_optimization_status().model;
        let accuracy = optimizer.train_predictor().unwrap();
        let after = optimizer.get_optimization_status().model;

        assert!((0.0..=1.0).contains(&accuracy));
        assert_ne!(before.bias, after.bias);
    }

    #[tokio::test]
    async fn test_status_reports_all_strategies() {
        let mitigation = Arc::new(RecordingMitigation::default());
        let optimizer = optimizer_with(fast_config(), mitigation, HealthRegistry::new());

        let status = optimizer.get_optimization_status();
        assert!(!status.is_optimizing);
        assert_eq!(status.active_strategies.len(), 5);
        assert_eq!(status.adaptive_thresholds["network"], 95.0);
        assert_eq!(status.model.weights, vec![0.3, 0.3, 0.4]);
        assert_eq!(status.model.accuracy, 1.0);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let executor = TaskExecutor::new(ExecutorConfig::default()).unwrap();
        let monitor =
            SystemMonitor::new(MonitorConfig::default(), Arc::new(ScriptedProbe::new())).unwrap();
        let config = OptimizerConfig {
            initial_weights: vec![0.5],
            ..Default::default()
        };

        assert!(matches!(
            PerformanceOptimizer::new(config, executor, monitor),
            Err(ConfigError::InvalidWeights(1))
        ));
    }

    #[tokio::test]
    async fn test_default_mitigation_uses_executor() {
        let executor = TaskExecutor::new(ExecutorConfig::default()).unwrap();
        let monitor =
            SystemMonitor::new(MonitorConfig::default(), Arc::new(ScriptedProbe::new())).unwrap();
        let optimizer =
            PerformanceOptimizer::new(OptimizerConfig::default(), executor.clone(), monitor).unwrap();

        optimizer.handle_metrics_update(&memory_pressure(95.0)).await;

        let metrics = executor.metrics();
        assert!(metrics.task_execution_times.contains_key("memory-optimization"));
        assert_eq!(metrics.cost_metrics.memory_usage, 95.0);
    }
}
