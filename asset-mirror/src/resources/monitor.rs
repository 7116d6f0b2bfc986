//! Point-in-time CPU and memory sampling.
//!
//! Each call to [`ResourceMonitor::sample`] takes a fresh reading and
//! returns an immutable [`ResourceSample`]; nothing is cached between calls.

use serde::Serialize;
use std::future::Future;
use std::time::Duration;

/// Above this CPU or memory percentage the host is considered overloaded.
const OVERLOAD_PERCENT: f64 = 90.0;

/// One snapshot of host utilization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub logical_cores: usize,
    pub physical_cores: usize,
}

impl ResourceSample {
    pub fn is_overloaded(&self) -> bool {
        self.cpu_percent > OVERLOAD_PERCENT || self.mem_percent > OVERLOAD_PERCENT
    }
}

/// Source of [`ResourceSample`]s.
pub trait ResourceMonitor: Send + Sync {
    fn sample(&self) -> impl Future<Output = ResourceSample> + Send;
}

/// Always reports the same sample.
#[derive(Debug, Clone, Copy)]
pub struct FixedMonitor(pub ResourceSample);

impl ResourceMonitor for FixedMonitor {
    fn sample(&self) -> impl Future<Output = ResourceSample> + Send {
        let sample = self.0;
        async move { sample }
    }
}

/// Reads host utilization from the operating system.
///
/// CPU usage is the busy share of two `/proc/stat` readings taken
/// `interval` apart. Any reading that is unavailable falls back to a
/// neutral value (0 % load, physical cores = logical cores) so sampling
/// never fails.
#[derive(Debug, Clone)]
pub struct SystemMonitor {
    interval: Duration,
}

impl SystemMonitor {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl ResourceMonitor for SystemMonitor {
    fn sample(&self) -> impl Future<Output = ResourceSample> + Send {
        let interval = self.interval;
        async move {
            let logical_cores = std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(1);

            let before = platform::cpu_times();
            tokio::time::sleep(interval).await;
            let after = platform::cpu_times();

            let cpu_percent = match (before, after) {
                (Some(b), Some(a)) => a.busy_percent_since(&b),
                _ => 0.0,
            };

            ResourceSample {
                cpu_percent,
                mem_percent: platform::mem_percent().unwrap_or(0.0),
                logical_cores,
                physical_cores: platform::physical_cores().unwrap_or(logical_cores),
            }
        }
    }
}

/// Aggregate CPU jiffies from the first line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

impl CpuTimes {
    pub fn busy_percent_since(&self, earlier: &CpuTimes) -> f64 {
        let total = self.total.saturating_sub(earlier.total);
        if total == 0 {
            return 0.0;
        }
        let idle = self.idle.saturating_sub(earlier.idle);
        (total.saturating_sub(idle) as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// Parse the aggregate `cpu` line of `/proc/stat`.
///
/// Guest time is already counted in user time, so only the first eight
/// fields form the total.
pub fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(|f| f.parse().ok())
        .collect::<Option<_>>()?;
    if fields.len() < 4 {
        return None;
    }

    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        idle,
        total: fields.iter().sum(),
    })
}

/// Used-memory percentage from `/proc/meminfo`.
pub fn parse_mem_percent(meminfo: &str) -> Option<f64> {
    let mut total = None;
    let mut available = None;

    for line in meminfo.lines() {
        // Format: "MemTotal:       16384000 kB"
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("MemTotal:") => total = parts.next().and_then(|v| v.parse::<u64>().ok()),
            Some("MemAvailable:") => available = parts.next().and_then(|v| v.parse::<u64>().ok()),
            _ => {}
        }
    }

    let total = total.filter(|t| *t > 0)?;
    let available = available?.min(total);
    Some((total - available) as f64 / total as f64 * 100.0)
}

/// Count distinct `(physical id, core id)` pairs in `/proc/cpuinfo`.
pub fn parse_physical_cores(cpuinfo: &str) -> Option<usize> {
    let mut cores = std::collections::HashSet::new();
    let mut physical_id = None;

    for line in cpuinfo.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        match name.trim() {
            "physical id" => physical_id = value.trim().parse::<u32>().ok(),
            "core id" => {
                if let Ok(core) = value.trim().parse::<u32>() {
                    cores.insert((physical_id.unwrap_or(0), core));
                }
            }
            _ => {}
        }
    }

    (!cores.is_empty()).then_some(cores.len())
}

#[cfg(target_os = "linux")]
mod platform {
    use super::*;
    use std::fs;

    pub fn cpu_times() -> Option<CpuTimes> {
        parse_cpu_times(&fs::read_to_string("/proc/stat").ok()?)
    }

    pub fn mem_percent() -> Option<f64> {
        parse_mem_percent(&fs::read_to_string("/proc/meminfo").ok()?)
    }

    pub fn physical_cores() -> Option<usize> {
        parse_physical_cores(&fs::read_to_string("/proc/cpuinfo").ok()?)
    }
}

#[cfg(not(target_os = "linux"))]
mod platform {
    use super::CpuTimes;

    pub fn cpu_times() -> Option<CpuTimes> {
        None
    }

    pub fn mem_percent() -> Option<f64> {
        None
    }

    pub fn physical_cores() -> Option<usize> {
        None
    }
}
