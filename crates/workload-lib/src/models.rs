//! Core data models shared by the executor, monitor and optimizer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Task priority classes accepted by the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Default,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Default => write!(f, "default"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// Resources that carry an adaptive threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Cpu,
    Memory,
    Network,
}

impl Resource {
    pub const ALL: [Resource; 3] = [Resource::Cpu, Resource::Memory, Resource::Network];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Cpu => "cpu",
            Resource::Memory => "memory",
            Resource::Network => "network",
        }
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a fitted linear trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    #[default]
    Stable,
}

/// Per-task bookkeeping owned by the executor while the task is alive
#[derive(Debug, Clone, Serialize)]
pub struct TaskMetadata {
    pub name: String,
    pub priority: Priority,
    pub category: String,
    pub started_at: DateTime<Utc>,
    pub attempts: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
}

/// Cost accounting derived from utilisation and observed resource usage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostMetrics {
    pub compute_cost: f64,
    pub resource_cost: f64,
    /// Latest observed host memory usage (percent)
    pub memory_usage: f64,
    /// Latest observed network usage (KB/s)
    pub network_usage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub success_rate: f64,
    pub performance_score: f64,
    pub reliability: f64,
    /// Approximation: downtime is estimated as one second per attempt of
    /// tasks that have failed at least once, not measured outage time.
    pub availability: f64,
}

impl Default for QualityMetrics {
    fn default() -> Self {
        Self {
            success_rate: 100.0,
            performance_score: 100.0,
            reliability: 100.0,
            availability: 100.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Throughput {
    pub tasks_per_second: f64,
    pub successful_tasks: u64,
    pub failed_tasks: u64,
}

/// Aggregate operational metrics maintained by the executor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationalMetrics {
    /// Last execution time per task name, in milliseconds
    pub task_execution_times: HashMap<String, f64>,
    /// Queue occupancy divided by the concurrency cap (percent)
    pub resource_utilization: f64,
    pub error_rates: HashMap<String, f64>,
    pub cost_metrics: CostMetrics,
    pub quality_metrics: QualityMetrics,
    pub throughput: Throughput,
}

impl OperationalMetrics {
    pub fn average_execution_ms(&self) -> f64 {
        if self.task_execution_times.is_empty() {
            return 0.0;
        }
        self.task_execution_times.values().sum::<f64>() / self.task_execution_times.len() as f64
    }
}

/// Resource usage observation pushed into the executor by value
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub network_kb_per_sec: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuStats {
    pub usage: f64,
    pub load_average: [f64; 3],
    pub frequency_mhz: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub bytes_in_per_sec: f64,
    pub bytes_out_per_sec: f64,
    pub packets_in_per_sec: f64,
    pub packets_out_per_sec: f64,
    pub errors: u64,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskStats {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub read_bytes_per_sec: f64,
    pub write_bytes_per_sec: f64,
    pub iops: f64,
}

impl DiskStats {
    pub fn used_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.used as f64 / self.total as f64 * 100.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessStats {
    pub pid: u32,
    pub uptime_secs: f64,
    pub memory_rss_bytes: u64,
    pub cpu_time_secs: f64,
    pub thread_count: u32,
}

/// Trend-derived forecast attached to every snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub cpu_trend: Trend,
    pub memory_trend: Trend,
    pub disk_trend: Trend,
    pub memory_exhaustion: Option<DateTime<Utc>>,
    pub disk_exhaustion: Option<DateTime<Utc>>,
    pub performance_issues: Vec<String>,
}

/// Point-in-time view of the host produced by the monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu: CpuStats,
    pub memory: MemoryStats,
    pub network: NetworkStats,
    pub disk: DiskStats,
    pub process: ProcessStats,
    pub predictions: Prediction,
}

impl Default for ResourceSnapshot {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            cpu: CpuStats::default(),
            memory: MemoryStats::default(),
            network: NetworkStats::default(),
            disk: DiskStats::default(),
            process: ProcessStats::default(),
            predictions: Prediction::default(),
        }
    }
}

impl ResourceSnapshot {
    pub fn usage(&self) -> ResourceUsage {
        ResourceUsage {
            cpu_percent: self.cpu.usage,
            memory_percent: self.memory.percentage,
            network_kb_per_sec: (self.network.bytes_in_per_sec + self.network.bytes_out_per_sec)
                / 1024.0,
        }
    }
}

/// One retained sample in the monitor's historical series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalEntry {
    pub timestamp: DateTime<Utc>,
    pub snapshot: ResourceSnapshot,
}
