//! Mitigation actions run by optimization strategies

use super::strategy::StrategyKind;
use crate::executor::{TaskExecutor, TaskOptions};
use crate::models::Priority;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// Category under which mitigation tasks are submitted
pub const MITIGATION_CATEGORY: &str = "optimization";

/// Default window during which low-priority admission is delayed
pub const DEFAULT_THROTTLE_WINDOW: Duration = Duration::from_secs(30);

/// Inputs available to a mitigation
#[derive(Debug, Clone, Copy)]
pub struct MitigationContext {
    /// Capacity multiplier from the success predictor
    pub scaling_factor: f64,
}

/// Trait for strategy mitigation implementations
#[async_trait]
pub trait Mitigation: Send + Sync {
    async fn apply(&self, strategy: StrategyKind, context: MitigationContext) -> Result<()>;
}

/// Delegates each strategy to a named task on the executor
pub struct ExecutorMitigation {
    executor: TaskExecutor,
    throttle_window: Duration,
}

impl ExecutorMitigation {
    pub fn new(executor: TaskExecutor) -> Self {
        Self {
            executor,
            throttle_window: DEFAULT_THROTTLE_WINDOW,
        }
    }

    pub fn with_throttle_window(mut self, window: Duration) -> Self {
        self.throttle_window = window;
        self
    }
}

#[async_trait]
impl Mitigation for ExecutorMitigation {
    async fn apply(&self, strategy: StrategyKind, context: MitigationContext) -> Result<()> {
        // The optimizer retries failed strategies itself
        let options = TaskOptions::new()
            .priority(Priority::High)
            .category(MITIGATION_CATEGORY)
            .max_retries(0);
        let executor = &self.executor;
        let window = self.throttle_window;

        executor
            .submit(strategy.task_name(), options, move || async move {
                match strategy {
                    StrategyKind::Memory => {
                        let removed = executor.compact_metrics();
                        info!(removed, "Reclaimed idle task bookkeeping");
                    }
                    StrategyKind::Cpu | StrategyKind::TaskQueue => {
                        executor.throttle_low_priority(window);
                    }
                    StrategyKind::Network => {
                        debug!("No network mitigation available beyond monitoring");
                    }
                    StrategyKind::PredictiveScaling => {
                        let cap = executor.apply_scaling(context.scaling_factor);
                        info!(
                            factor = context.scaling_factor,
                            cap, "Predictive scaling applied"
                        );
                    }
                }
                Ok(())
            })
            .await?;
        Ok(())
    }
}
