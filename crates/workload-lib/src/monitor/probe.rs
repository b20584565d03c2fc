//! Host resource probes
//!
//! A probe returns raw, mostly cumulative counters; the monitor turns
//! consecutive samples into rates. The procfs probe reads:
//! - /proc/stat, /proc/loadavg and /proc/cpuinfo for CPU
//! - /proc/meminfo for memory
//! - /proc/net/dev and /proc/diskstats for I/O counters
//! - /proc/self/stat and /proc/self/status for the current process

use crate::config::MonitorConfig;
use crate::models::{MemoryStats, ProcessStats};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use sysinfo::Disks;
use tokio::fs;
use tokio::net::TcpStream;
use tracing::debug;

/// Kernel clock ticks per second used by /proc/self/stat
const CLOCK_TICKS: f64 = 100.0;

/// Bytes per sector in /proc/diskstats
const SECTOR_SIZE: u64 = 512;

const LATENCY_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Cumulative CPU jiffies aggregated across cores
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

/// Cumulative interface counters, loopback excluded
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NetCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub errors: u64,
}

/// Cumulative block device counters, whole disks only
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DiskIoCounters {
    pub reads_completed: u64,
    pub writes_completed: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DiskCapacity {
    pub total: u64,
    pub available: u64,
}

/// One raw observation of the host
#[derive(Debug, Clone, Default)]
pub struct RawSample {
    pub cpu: CpuTimes,
    pub load_average: [f64; 3],
    pub frequency_mhz: f64,
    pub memory: MemoryStats,
    pub net: NetCounters,
    pub disk_io: DiskIoCounters,
    pub disk: DiskCapacity,
    pub process: ProcessStats,
    pub latency_ms: f64,
}

/// Trait for host sampling implementations
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    async fn sample(&self) -> Result<RawSample>;
}

/// Probe reading the Linux proc filesystem
pub struct ProcfsProbe {
    proc_root: PathBuf,
    disk_mount: PathBuf,
    latency_probe_addr: Option<String>,
    started: Instant,
}

impl ProcfsProbe {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            proc_root: PathBuf::from(&config.proc_root),
            disk_mount: PathBuf::from(&config.disk_mount),
            latency_probe_addr: config.latency_probe_addr.clone(),
            started: Instant::now(),
        }
    }

    /// Create a probe with a custom proc path (for testing)
    pub fn with_proc_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            disk_mount: PathBuf::from("/"),
            latency_probe_addr: None,
            started: Instant::now(),
        }
    }

    /// Parse the aggregate `cpu` line of /proc/stat
    pub fn parse_stat(content: &str) -> Result<CpuTimes> {
        let line = content
            .lines()
            .find(|line| line.starts_with("cpu "))
            .ok_or_else(|| anyhow!("No aggregate cpu line in /proc/stat"))?;

        let values: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .map(|v| v.parse().unwrap_or(0))
            .collect();
        if values.len() < 4 {
            return Err(anyhow!("Truncated cpu line in /proc/stat"));
        }

        // user nice system idle iowait irq softirq steal; guest time is
        // already included in user
        let idle = values[3] + values.get(4).copied().unwrap_or(0);
        let total = values.iter().take(8).sum();
        Ok(CpuTimes { idle, total })
    }

    pub fn parse_loadavg(content: &str) -> [f64; 3] {
        let mut load = [0.0; 3];
        for (slot, value) in load.iter_mut().zip(content.split_whitespace()) {
            *slot = value.parse().unwrap_or(0.0);
        }
        load
    }

    /// Mean of the per-core `cpu MHz` entries
    pub fn parse_cpuinfo(content: &str) -> f64 {
        let speeds: Vec<f64> = content
            .lines()
            .filter(|line| line.starts_with("cpu MHz"))
            .filter_map(|line| line.split(':').nth(1))
            .filter_map(|value| value.trim().parse().ok())
            .collect();
        if speeds.is_empty() {
            return 0.0;
        }
        speeds.iter().sum::<f64>() / speeds.len() as f64
    }

    pub fn parse_meminfo(content: &str) -> Result<MemoryStats> {
        let mut total = None;
        let mut free = None;
        let mut available = None;

        for line in content.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 2 {
                continue;
            }
            let kib: u64 = parts[1].parse().unwrap_or(0);
            match parts[0] {
                "MemTotal:" => total = Some(kib * 1024),
                "MemFree:" => free = Some(kib * 1024),
                "MemAvailable:" => available = Some(kib * 1024),
                _ => {}
            }
        }

        let total = total.ok_or_else(|| anyhow!("MemTotal missing from /proc/meminfo"))?;
        let free = available.or(free).unwrap_or(0).min(total);
        let used = total - free;
        let percentage = if total > 0 {
            used as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Ok(MemoryStats {
            total,
            used,
            free,
            percentage,
        })
    }

    pub fn parse_net_dev(content: &str) -> NetCounters {
        let mut counters = NetCounters::default();

        for line in content.lines() {
            let Some((iface, stats)) = line.split_once(':') else {
                continue;
            };
            if iface.trim() == "lo" {
                continue;
            }
            let fields: Vec<u64> = stats
                .split_whitespace()
                .map(|v| v.parse().unwrap_or(0))
                .collect();
            if fields.len() < 16 {
                continue;
            }
            counters.rx_bytes += fields[0];
            counters.rx_packets += fields[1];
            counters.errors += fields[2] + fields[10];
            counters.tx_bytes += fields[8];
            counters.tx_packets += fields[9];
        }

        counters
    }

    /// Sum whole-disk counters, skipping virtual devices and partitions
    pub fn parse_diskstats(content: &str) -> DiskIoCounters {
        let devices: Vec<(&str, Vec<u64>)> = content
            .lines()
            .filter_map(|line| {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() < 10 {
                    return None;
                }
                let name = parts[2];
                if ["loop", "ram", "dm-"].iter().any(|prefix| name.starts_with(prefix)) {
                    return None;
                }
                let values = parts[3..].iter().map(|v| v.parse().unwrap_or(0)).collect();
                Some((name, values))
            })
            .collect();

        let mut counters = DiskIoCounters::default();
        for (name, values) in &devices {
            let is_partition = devices
                .iter()
                .any(|(other, _)| is_partition_of(name, other));
            if is_partition {
                continue;
            }
            counters.reads_completed += values[0];
            counters.bytes_read += values[2] * SECTOR_SIZE;
            counters.writes_completed += values[4];
            counters.bytes_written += values[6] * SECTOR_SIZE;
        }
        counters
    }

    /// Returns (cpu_time_secs, thread_count) from /proc/self/stat
    pub fn parse_self_stat(content: &str) -> (f64, u32) {
        // The command name may contain spaces, fields resume after ')'
        let Some(rest) = content.rsplit_once(')').map(|(_, rest)| rest) else {
            return (0.0, 0);
        };
        let fields: Vec<&str> = rest.split_whitespace().collect();
        let parse = |idx: usize| -> u64 {
            fields.get(idx).and_then(|v| v.parse().ok()).unwrap_or(0)
        };
        let cpu_time = (parse(11) + parse(12)) as f64 / CLOCK_TICKS;
        (cpu_time, parse(17) as u32)
    }

    /// Returns (rss_bytes, thread_count) from /proc/self/status
    pub fn parse_self_status(content: &str) -> (u64, u32) {
        let mut rss = 0;
        let mut threads = 0;
        for line in content.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts.as_slice() {
                ["VmRSS:", value, ..] => rss = value.parse::<u64>().unwrap_or(0) * 1024,
                ["Threads:", value, ..] => threads = value.parse().unwrap_or(0),
                _ => {}
            }
        }
        (rss, threads)
    }

    async fn read(&self, relative: &str) -> Result<String> {
        let path = self.proc_root.join(relative);
        fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    /// Missing optional files fall back to zeroed stats
    async fn read_optional(&self, relative: &str) -> String {
        match self.read(relative).await {
            Ok(content) => content,
            Err(e) => {
                debug!(file = %relative, error = %e, "Optional proc file unavailable");
                String::new()
            }
        }
    }

    async fn process_stats(&self) -> ProcessStats {
        let (cpu_time_secs, stat_threads) =
            Self::parse_self_stat(&self.read_optional("self/stat").await);
        let (memory_rss_bytes, status_threads) =
            Self::parse_self_status(&self.read_optional("self/status").await);

        ProcessStats {
            pid: std::process::id(),
            uptime_secs: self.started.elapsed().as_secs_f64(),
            memory_rss_bytes,
            cpu_time_secs,
            thread_count: if status_threads > 0 {
                status_threads
            } else {
                stat_threads
            },
        }
    }

    async fn disk_capacity(&self) -> DiskCapacity {
        let mount = self.disk_mount.clone();
        let result = tokio::task::spawn_blocking(move || capacity_for_mount(&mount)).await;
        match result {
            Ok(capacity) => capacity,
            Err(e) => {
                debug!(error = %e, "Disk capacity lookup failed");
                DiskCapacity::default()
            }
        }
    }

    async fn latency_ms(&self) -> f64 {
        let Some(addr) = &self.latency_probe_addr else {
            return 0.0;
        };

        let start = Instant::now();
        match tokio::time::timeout(LATENCY_PROBE_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => start.elapsed().as_secs_f64() * 1000.0,
            Ok(Err(e)) => {
                debug!(addr = %addr, error = %e, "Latency probe connect failed");
                0.0
            }
            Err(_) => LATENCY_PROBE_TIMEOUT.as_secs_f64() * 1000.0,
        }
    }
}

/// `sda1` of `sda`, `nvme0n1p2` of `nvme0n1`
fn is_partition_of(name: &str, disk: &str) -> bool {
    let Some(suffix) = name.strip_prefix(disk) else {
        return false;
    };
    let digits = suffix.strip_prefix('p').unwrap_or(suffix);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Capacity of the filesystem mounted at `mount`, or the first one listed
fn capacity_for_mount(mount: &Path) -> DiskCapacity {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .find(|disk| disk.mount_point() == mount)
        .or_else(|| disks.list().first())
        .map(|disk| DiskCapacity {
            total: disk.total_space(),
            available: disk.available_space(),
        })
        .unwrap_or_default()
}

#[async_trait]
impl ResourceProbe for ProcfsProbe {
    async fn sample(&self) -> Result<RawSample> {
        let cpu = Self::parse_stat(&self.read("stat").await?)?;
        let memory = Self::parse_meminfo(&self.read("meminfo").await?)?;

        Ok(RawSample {
            cpu,
            load_average: Self::parse_loadavg(&self.read_optional("loadavg").await),
            frequency_mhz: Self::parse_cpuinfo(&self.read_optional("cpuinfo").await),
            memory,
            net: Self::parse_net_dev(&self.read_optional("net/dev").await),
            disk_io: Self::parse_diskstats(&self.read_optional("diskstats").await),
            disk: self.disk_capacity().await,
            process: self.process_stats().await,
            latency_ms: self.latency_ms().await,
        })
    }
}

const SCRIPTED_MEMORY_TOTAL: u64 = 16 * 1024 * 1024 * 1024;
const SCRIPTED_DISK_TOTAL: u64 = 100 * 1024 * 1024 * 1024;
const SCRIPTED_JIFFIES_PER_STEP: u64 = 1000;

#[derive(Debug, Clone)]
enum ScriptStep {
    Usage { cpu: f64, memory: f64, latency_ms: f64 },
    Failure(String),
}

#[derive(Debug, Default)]
struct Script {
    steps: VecDeque<ScriptStep>,
    last_usage: Option<ScriptStep>,
    cpu: CpuTimes,
}

/// Probe replaying a fixed sequence of usage levels
///
/// CPU counters advance so that each step yields exactly the scripted
/// usage. Once the script runs out the last usage level repeats.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    script: Mutex<Script>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe that reports the given (cpu %, memory %) pairs in order
    pub fn from_usage(levels: &[(f64, f64)]) -> Self {
        let probe = Self::new();
        for (cpu, memory) in levels {
            probe.push_usage(*cpu, *memory);
        }
        probe
    }

    pub fn push_usage(&self, cpu: f64, memory: f64) {
        self.push_step(ScriptStep::Usage {
            cpu,
            memory,
            latency_ms: 0.0,
        });
    }

    pub fn push_usage_with_latency(&self, cpu: f64, memory: f64, latency_ms: f64) {
        self.push_step(ScriptStep::Usage {
            cpu,
            memory,
            latency_ms,
        });
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        self.push_step(ScriptStep::Failure(message.into()));
    }

    fn push_step(&self, step: ScriptStep) {
        self.lock().steps.push_back(step);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ResourceProbe for ScriptedProbe {
    async fn sample(&self) -> Result<RawSample> {
        let mut script = self.lock();
        let step = match script.steps.pop_front() {
            Some(step) => step,
            None => script
                .last_usage
                .clone()
                .ok_or_else(|| anyhow!("Scripted probe has no samples"))?,
        };

        let (cpu, memory, latency_ms) = match step {
            ScriptStep::Failure(message) => return Err(anyhow!(message)),
            ScriptStep::Usage {
                cpu,
                memory,
                latency_ms,
            } => (cpu, memory, latency_ms),
        };
        script.last_usage = Some(ScriptStep::Usage {
            cpu,
            memory,
            latency_ms,
        });

        let busy = ((cpu.clamp(0.0, 100.0) / 100.0) * SCRIPTED_JIFFIES_PER_STEP as f64).round() as u64;
        script.cpu.total += SCRIPTED_JIFFIES_PER_STEP;
        script.cpu.idle += SCRIPTED_JIFFIES_PER_STEP - busy;

        let used = (SCRIPTED_MEMORY_TOTAL as f64 * memory.clamp(0.0, 100.0) / 100.0) as u64;
        Ok(RawSample {
            cpu: script.cpu,
            memory: MemoryStats {
                total: SCRIPTED_MEMORY_TOTAL,
                used,
                free: SCRIPTED_MEMORY_TOTAL - used,
                percentage: memory,
            },
            disk: DiskCapacity {
                total: SCRIPTED_DISK_TOTAL,
                available: SCRIPTED_DISK_TOTAL / 2,
            },
            latency_ms,
            ..Default::default()
        })
    }
}
