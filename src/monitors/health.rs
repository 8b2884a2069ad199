//! Health snapshot collection
//!
//! The collector never fails: every metric carries its own `valid` flag and
//! unreadable sources produce zero-filled readings. Kernel-table reads are
//! cached for one second so back-to-back snapshot requests (the monitor
//! tick plus a `health` request on the socket) don't hammer the host.
//!
//! CPU usage needs two observations: it is computed from the delta between
//! successive reads of the aggregate jiffies row in `/proc/stat`. The first
//! ever read, and any read less than 100 ms after the previous one, reports
//! 0.0.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sysinfo::{Disks, System};
use tokio::process::Command;
use tracing::debug;

use crate::util::format_utc;

const CACHE_TTL: Duration = Duration::from_millis(1000);
const CPU_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Aggregate CPU jiffies from the `cpu` row of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuJiffies {
    pub idle: u64,
    pub total: u64,
}

/// Parse the aggregate `cpu` line of `/proc/stat`.
///
/// Sums the first eight columns (user, nice, system, idle, iowait, irq,
/// softirq, steal); idle time includes iowait.
pub fn parse_cpu_line(line: &str) -> Option<CpuJiffies> {
    let mut fields = line.split_whitespace();
    if fields.next() != Some("cpu") {
        return None;
    }

    let values: Vec<u64> = fields
        .take(8)
        .map(|v| v.parse::<u64>())
        .collect::<Result<_, _>>()
        .ok()?;
    if values.len() < 5 {
        return None;
    }

    let idle = values[3] + values[4];
    let total = values.iter().sum();
    Some(CpuJiffies { idle, total })
}

/// Usage percentage between two jiffies observations, clamped to [0, 100].
pub fn cpu_percent(prev: CpuJiffies, current: CpuJiffies) -> f64 {
    let total_delta = current.total.saturating_sub(prev.total);
    if total_delta == 0 {
        return 0.0;
    }
    let idle_delta = current.idle.saturating_sub(prev.idle);
    let busy = total_delta.saturating_sub(idle_delta);
    (busy as f64 / total_delta as f64 * 100.0).clamp(0.0, 100.0)
}

/// Count failed units in `systemctl list-units --state=failed` plain output.
pub fn count_failed_lines(stdout: &str) -> u64 {
    stdout.lines().filter(|line| !line.trim().is_empty()).count() as u64
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuReading {
    pub percent: f64,
    pub valid: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryReading {
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub valid: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DiskReading {
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub mount: String,
    pub valid: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UnitsReading {
    pub failed: u64,
    pub valid: bool,
}

/// Immutable record of host-health metrics captured at one moment.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu: CpuReading,
    pub memory: MemoryReading,
    pub disk: DiskReading,
    pub uptime_secs: u64,
    pub units: UnitsReading,
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        Self {
            timestamp: DateTime::UNIX_EPOCH,
            cpu: CpuReading::default(),
            memory: MemoryReading::default(),
            disk: DiskReading::default(),
            uptime_secs: 0,
            units: UnitsReading::default(),
        }
    }
}

impl HealthSnapshot {
    /// Memory usage as a fraction of total, 0.0 when unreadable.
    pub fn memory_fraction(&self) -> f64 {
        if !self.memory.valid || self.memory.total == 0 {
            return 0.0;
        }
        self.memory.used as f64 / self.memory.total as f64
    }

    /// Disk usage as a fraction of total, 0.0 when unreadable.
    pub fn disk_fraction(&self) -> f64 {
        if !self.disk.valid || self.disk.total == 0 {
            return 0.0;
        }
        self.disk.used as f64 / self.disk.total as f64
    }

    /// CPU usage as a fraction, 0.0 when unreadable.
    pub fn cpu_fraction(&self) -> f64 {
        if !self.cpu.valid {
            return 0.0;
        }
        self.cpu.percent / 100.0
    }

    pub fn to_json(&self) -> Value {
        json!({
            "timestamp": format_utc(self.timestamp),
            "cpu": {
                "usage_percent": self.cpu.percent,
                "valid": self.cpu.valid,
            },
            "memory": {
                "total_bytes": self.memory.total,
                "used_bytes": self.memory.used,
                "available_bytes": self.memory.available,
                "valid": self.memory.valid,
            },
            "disk": {
                "total_bytes": self.disk.total,
                "used_bytes": self.disk.used,
                "available_bytes": self.disk.available,
                "mount": self.disk.mount,
                "valid": self.disk.valid,
            },
            "uptime_secs": self.uptime_secs,
            "failed_units": self.units.failed,
            "failed_units_valid": self.units.valid,
        })
    }
}

/// Stateful collector of [`HealthSnapshot`]s.
pub struct HealthCollector {
    sys: System,
    last_cpu: Option<(CpuJiffies, Instant)>,
    memory_cache: Option<(MemoryReading, Instant)>,
    disk_cache: Option<(DiskReading, Instant)>,
}

impl Default for HealthCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthCollector {
    pub fn new() -> Self {
        Self {
            sys: System::new(),
            last_cpu: None,
            memory_cache: None,
            disk_cache: None,
        }
    }

    /// Collect a fresh snapshot. Never fails; unreadable sources yield
    /// zeroed readings with `valid == false`.
    pub async fn collect(&mut self) -> HealthSnapshot {
        let cpu = self.read_cpu();
        let memory = self.read_memory();
        let disk = self.read_disk();
        let units = read_failed_units().await;

        HealthSnapshot {
            timestamp: Utc::now(),
            cpu,
            memory,
            disk,
            uptime_secs: System::uptime(),
            units,
        }
    }

    fn read_cpu(&mut self) -> CpuReading {
        let raw = match std::fs::read_to_string("/proc/stat") {
            Ok(raw) => raw,
            Err(e) => {
                debug!("failed to read /proc/stat: {e}");
                return CpuReading::default();
            }
        };

        let Some(current) = raw.lines().next().and_then(parse_cpu_line) else {
            debug!("failed to parse /proc/stat cpu line");
            return CpuReading::default();
        };

        match self.last_cpu {
            None => {
                self.last_cpu = Some((current, Instant::now()));
                CpuReading {
                    percent: 0.0,
                    valid: true,
                }
            }
            Some((_, at)) if at.elapsed() < CPU_MIN_INTERVAL => CpuReading {
                percent: 0.0,
                valid: true,
            },
            Some((prev, _)) => {
                let percent = cpu_percent(prev, current);
                self.last_cpu = Some((current, Instant::now()));
                CpuReading {
                    percent,
                    valid: true,
                }
            }
        }
    }

    fn read_memory(&mut self) -> MemoryReading {
        if let Some((reading, at)) = self.memory_cache {
            if at.elapsed() < CACHE_TTL {
                return reading;
            }
        }

        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        let reading = MemoryReading {
            total,
            used: self.sys.used_memory(),
            available: self.sys.available_memory(),
            valid: total > 0,
        };
        self.memory_cache = Some((reading, Instant::now()));
        reading
    }

    fn read_disk(&mut self) -> DiskReading {
        if let Some((reading, at)) = &self.disk_cache {
            if at.elapsed() < CACHE_TTL {
                return reading.clone();
            }
        }

        let disks = Disks::new_with_refreshed_list();
        let root = disks
            .list()
            .iter()
            .find(|disk| disk.mount_point() == std::path::Path::new("/"))
            .or_else(|| disks.list().first());

        let reading = match root {
            Some(disk) => {
                let total = disk.total_space();
                let available = disk.available_space();
                DiskReading {
                    total,
                    used: total.saturating_sub(available),
                    available,
                    mount: disk.mount_point().to_string_lossy().into_owned(),
                    valid: total > 0,
                }
            }
            None => DiskReading::default(),
        };
        self.disk_cache = Some((reading.clone(), Instant::now()));
        reading
    }
}

/// Count units the service manager reports as failed.
///
/// Shells out to `systemctl`; there is no persistent handle to tear down,
/// so a failed invocation simply yields an invalid reading and the next
/// call starts fresh.
async fn read_failed_units() -> UnitsReading {
    let output = Command::new("systemctl")
        .args(["list-units", "--state=failed", "--plain", "--no-legend", "--no-pager"])
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => UnitsReading {
            failed: count_failed_lines(&String::from_utf8_lossy(&out.stdout)),
            valid: true,
        },
        Ok(out) => {
            debug!("systemctl exited with {}", out.status);
            UnitsReading::default()
        }
        Err(e) => {
            debug!("failed to run systemctl: {e}");
            UnitsReading::default()
        }
    }
}
