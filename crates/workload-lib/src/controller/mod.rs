//! Composition root for the workload control loop
//!
//! Builds the executor, monitor and optimizer from one configuration,
//! wires the monitor and executor notifications into the optimizer and
//! owns the background loops until shutdown.


use crate::config::{ConfigError, ControlConfig};
use crate::executor::TaskExecutor;
use crate::health::HealthRegistry;
use crate::monitor::{ResourceProbe, SystemMonitor};
use crate::observability::StructuredLogger;
use crate::optimizer::{OptimizationStatus, PerformanceOptimizer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Owns the three control loop components and their lifecycle
pub struct WorkloadController {
    config: ControlConfig,
    executor: TaskExecutor,
    monitor: SystemMonitor,
    optimizer: PerformanceOptimizer,
    health: HealthRegistry,
    logger: StructuredLogger,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl WorkloadController {
    pub async fn new(
        config: ControlConfig,
        probe: Arc<dyn ResourceProbe>,
    ) -> Result<Self, ConfigError> {
        Self::with_logger(config, probe, StructuredLogger::default()).await
    }

    /// Validate the configuration and construct every component
    pub async fn with_logger(
        config: ControlConfig,
        probe: Arc<dyn ResourceProbe>,
        logger: StructuredLogger,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let health = HealthRegistry::for_control_loop().await;
        let executor = TaskExecutor::with_logger(config.executor.clone(), logger.clone())?;
        let monitor = SystemMonitor::with_health(
            config.monitor.clone(),
            probe,
            health.clone(),
            logger.clone(),
        )?;
        let optimizer = PerformanceOptimizer::new_with_health(
            config.optimizer.clone(),
            executor.clone(),
            monitor.clone(),
            health.clone(),
            logger.clone(),
        )?;

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            executor,
            monitor,
            optimizer,
            health,
            logger,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    pub fn monitor(&self) -> &SystemMonitor {
        &self.monitor
    }

    pub fn optimizer(&self) -> &PerformanceOptimizer {
        &self.optimizer
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn status(&self) -> OptimizationStatus {
        self.optimizer.get_optimization_status()
    }

    /// Spawn every background loop; later calls are no-ops
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Controller already started");
            return;
        }

        // Subscribe before the loops run so no early notification is lost
        let monitor_events = self.monitor.subscribe();
        let executor_events = self.executor.subscribe();

        let handles = vec![
            tokio::spawn(self.executor.clone().run(self.shutdown_tx.subscribe())),
            tokio::spawn(self.monitor.clone().run(self.shutdown_tx.subscribe())),
            tokio::spawn(self.optimizer.clone().run(self.shutdown_tx.subscribe())),
            tokio::spawn(self.optimizer.clone().run_event_pump(
                monitor_events,
                executor_events,
                self.shutdown_tx.subscribe(),
            )),
        ];
        self.lock_handles().extend(handles);

        self.health.set_ready(true).await;
        self.logger.log_startup(VERSION);
    }

    /// Stop every loop, wait for them and release all subscriptions
    pub async fn shutdown(&self, reason: &str) {
        self.logger.log_shutdown(reason);
        self.health.set_ready(false).await;

        // No receivers left is fine, the loops may already be gone
        let _ = self.shutdown_tx.send(());

        let handles: Vec<_> = self.lock_handles().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Control loop task ended abnormally");
            }
        }

        self.optimizer.cleanup();
        self.monitor.cleanup();
        self.executor.cleanup();
        info!("Workload controller stopped");
    }

    fn lock_handles(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
