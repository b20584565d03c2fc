//! Adaptive workload control library
//!
//! This crate provides the core functionality for:
//! - Bounded task execution with retries and bottleneck detection
//! - Host resource sampling with trend prediction and alerting
//! - Strategy-driven optimization with adaptive thresholds
//! - Health checks and observability

pub mod config;
pub mod controller;
pub mod events;
pub mod executor;
pub mod health;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod optimizer;

pub use config::{ConfigError, ControlConfig};
pub use controller::WorkloadController;
pub use executor::{ExecutorError, TaskExecutor, TaskOptions};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use monitor::{ProcfsProbe, ResourceProbe, SystemMonitor};
pub use observability::{ControlMetrics, StructuredLogger};
pub use optimizer::{OptimizationResult, OptimizationStatus, PerformanceOptimizer};
