//! Typed configuration for the workload control loop
//!
//! Every section deserializes with per-field defaults so partial config
//! files and environment overrides work. `validate` rejects values that
//! would make a component unusable; those are fatal at construction.

use crate::models::Priority;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Upper bound for the concurrency cap, the semaphore's permit limit
pub const MAX_TASK_SLOTS: u64 = tokio::sync::Semaphore::MAX_PERMITS as u64;

/// Upper bound for `retention_period_mins` (ten years)
pub const MAX_RETENTION_MINS: u64 = 10 * 365 * 24 * 60;

/// Fatal configuration errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_concurrent_tasks must be at least 1")]
    InvalidConcurrency,
    #[error("{name} must not exceed {max}, got {value}")]
    TooLarge {
        name: &'static str,
        value: u64,
        max: u64,
    },
    #[error("{resource} limit must be between 0 and 100, got {value}")]
    LimitOutOfRange { resource: &'static str, value: f64 },
    #[error("network limit must not be negative, got {0}")]
    NegativeNetworkLimit(f64),
    #[error("max_scaled_tasks ({scaled}) must not be below max_concurrent_tasks ({base})")]
    InvalidScalingBound { base: usize, scaled: usize },
    #[error("optimization rule threshold must be between 0 and 1, got {0}")]
    InvalidRuleThreshold(f64),
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
    #[error("initial_weights must contain exactly 3 values, got {0}")]
    InvalidWeights(usize),
    #[error("learning_rate must be a positive finite number, got {0}")]
    InvalidLearningRate(f64),
}

/// Hard limits for resource-driven bottleneck detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Memory usage limit (percent)
    pub memory: f64,
    /// CPU utilization limit (percent)
    pub cpu: f64,
    /// Network usage limit (KB/s)
    pub network: f64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory: 80.0,
            cpu: 70.0,
            network: 1000.0,
        }
    }
}

/// Action requested by a response rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Alert,
    Optimize,
    Scale,
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleAction::Alert => write!(f, "alert"),
            RuleAction::Optimize => write!(f, "optimize"),
            RuleAction::Scale => write!(f, "scale"),
        }
    }
}

/// Bottleneck response rule evaluated after every scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationRule {
    /// Utilization fraction (0..=1) above which the rule applies
    pub threshold: f64,
    pub action: RuleAction,
    pub priority: i32,
    pub cooldown_ms: u64,
}

impl OptimizationRule {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Numeric weight for each priority class
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPriorities {
    pub low: i32,
    pub default: i32,
    pub high: i32,
    pub critical: i32,
}

impl Default for TaskPriorities {
    fn default() -> Self {
        Self {
            low: 0,
            default: 1,
            high: 2,
            critical: 3,
        }
    }
}

impl TaskPriorities {
    pub fn weight(&self, priority: Priority) -> i32 {
        match priority {
            Priority::Low => self.low,
            Priority::Default => self.default,
            Priority::High => self.high,
            Priority::Critical => self.critical,
        }
    }
}

/// Task executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_concurrent_tasks: usize,
    pub auto_scaling: bool,
    /// Upper bound for the concurrency cap when auto scaling
    pub max_scaled_tasks: usize,
    pub resource_limits: ResourceLimits,
    pub optimization_rules: Vec<OptimizationRule>,
    pub task_priorities: TaskPriorities,
    pub adaptive_thresholds: bool,
    pub default_max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub bottleneck_scan_interval_secs: u64,
    pub threshold_update_interval_secs: u64,
    /// Admission delay for low-priority work while throttled
    pub throttle_delay_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 10,
            auto_scaling: false,
            max_scaled_tasks: 40,
            resource_limits: ResourceLimits::default(),
            optimization_rules: vec![
                OptimizationRule {
                    threshold: 0.7,
                    action: RuleAction::Alert,
                    priority: 1,
                    cooldown_ms: 60_000,
                },
                OptimizationRule {
                    threshold: 0.8,
                    action: RuleAction::Optimize,
                    priority: 2,
                    cooldown_ms: 120_000,
                },
                OptimizationRule {
                    threshold: 0.9,
                    action: RuleAction::Scale,
                    priority: 3,
                    cooldown_ms: 300_000,
                },
            ],
            task_priorities: TaskPriorities::default(),
            adaptive_thresholds: true,
            default_max_retries: 3,
            retry_base_delay_ms: 1000,
            max_retry_delay_ms: 30_000,
            bottleneck_scan_interval_secs: 5,
            threshold_update_interval_secs: 60,
            throttle_delay_ms: 250,
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_tasks < 1 {
            return Err(ConfigError::InvalidConcurrency);
        }
        check_at_most("max_concurrent_tasks", self.max_concurrent_tasks as u64, MAX_TASK_SLOTS)?;
        if self.auto_scaling {
            check_at_most("max_scaled_tasks", self.max_scaled_tasks as u64, MAX_TASK_SLOTS)?;
        }
        if self.auto_scaling && self.max_scaled_tasks < self.max_concurrent_tasks {
            return Err(ConfigError::InvalidScalingBound {
                base: self.max_concurrent_tasks,
                scaled: self.max_scaled_tasks,
            });
        }
        check_percent("cpu", self.resource_limits.cpu)?;
        check_percent("memory", self.resource_limits.memory)?;
        if self.resource_limits.network < 0.0 || !self.resource_limits.network.is_finite() {
            return Err(ConfigError::NegativeNetworkLimit(self.resource_limits.network));
        }
        for rule in &self.optimization_rules {
            if !(0.0..=1.0).contains(&rule.threshold) {
                return Err(ConfigError::InvalidRuleThreshold(rule.threshold));
            }
        }
        if self.bottleneck_scan_interval_secs == 0 {
            return Err(ConfigError::ZeroValue("bottleneck_scan_interval_secs"));
        }
        if self.threshold_update_interval_secs == 0 {
            return Err(ConfigError::ZeroValue("threshold_update_interval_secs"));
        }
        Ok(())
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }
}

fn check_at_most(name: &'static str, value: u64, max: u64) -> Result<(), ConfigError> {
    if value > max {
        return Err(ConfigError::TooLarge { name, value, max });
    }
    Ok(())
}

fn check_percent(resource: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::LimitOutOfRange { resource, value })
    }
}

/// Alert thresholds for the system monitor (independent of the optimizer)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
    /// Network latency in milliseconds
    pub network: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            cpu: 80.0,
            memory: 90.0,
            disk: 90.0,
            network: 80.0,
        }
    }
}

/// System monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub update_interval_ms: u64,
    pub enable_predictions: bool,
    pub alert_thresholds: AlertThresholds,
    /// How long historical samples are retained, in minutes
    pub retention_period_mins: u64,
    pub proc_root: String,
    pub disk_mount: String,
    /// Optional host:port used to measure TCP connect latency
    pub latency_probe_addr: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 1000,
            enable_predictions: true,
            alert_thresholds: AlertThresholds::default(),
            retention_period_mins: 60,
            proc_root: "/proc".to_string(),
            disk_mount: "/".to_string(),
            latency_probe_addr: None,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.update_interval_ms == 0 {
            return Err(ConfigError::ZeroValue("update_interval_ms"));
        }
        if self.retention_period_mins == 0 {
            return Err(ConfigError::ZeroValue("retention_period_mins"));
        }
        check_at_most(
            "retention_period_mins",
            self.retention_period_mins,
            MAX_RETENTION_MINS,
        )?;
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.retention_period_mins.min(MAX_RETENTION_MINS) as i64)
    }
}

/// Performance optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub max_history_size: usize,
    pub learning_rate: f64,
    pub initial_weights: Vec<f64>,
    pub training_interval_secs: u64,
    pub threshold_update_interval_secs: u64,
    pub max_strategy_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_history_size: 1000,
            learning_rate: 0.01,
            initial_weights: vec![0.3, 0.3, 0.4],
            training_interval_secs: 300,
            threshold_update_interval_secs: 60,
            max_strategy_attempts: 3,
            retry_base_delay_ms: 1000,
            max_retry_delay_ms: 10_000,
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_history_size == 0 {
            return Err(ConfigError::ZeroValue("max_history_size"));
        }
        if self.initial_weights.len() != 3 {
            return Err(ConfigError::InvalidWeights(self.initial_weights.len()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ConfigError::InvalidLearningRate(self.learning_rate));
        }
        if self.max_strategy_attempts == 0 {
            return Err(ConfigError::ZeroValue("max_strategy_attempts"));
        }
        if self.training_interval_secs == 0 {
            return Err(ConfigError::ZeroValue("training_interval_secs"));
        }
        if self.threshold_update_interval_secs == 0 {
            return Err(ConfigError::ZeroValue("threshold_update_interval_secs"));
        }
        Ok(())
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }
}

/// Complete configuration for the control loop
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub executor: ExecutorConfig,
    pub monitor: MonitorConfig,
    pub optimizer: OptimizerConfig,
}

impl ControlConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.executor.validate()?;
        self.monitor.validate()?;
        self.optimizer.validate()
    }
}

/// Exponential backoff: `base * 2^(attempt - 1)`, capped at `max`
pub fn backoff_delay(base: Duration, attempt: u32, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent).min(max)
}
