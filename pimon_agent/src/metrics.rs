//! Snapshot collection using sysinfo for pimon_agent.

use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use once_cell::sync::OnceCell;
use sysinfo::{Components, Disks, System};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::types::{CpuInfo, DiskInfo, MemoryInfo, Snapshot, TemperatureInfo};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("{0} reading unavailable")]
    Unavailable(&'static str),
    #[error("sensor read failed: {0}")]
    Sensor(String),
    #[error("snapshot timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("previous snapshot still running")]
    Busy,
    #[error("sampler task failed: {0}")]
    Task(String),
    #[error("clock formatting failed: {0}")]
    Clock(#[from] time::error::Format),
}

/// Produces one telemetry snapshot on demand. Called from a blocking thread,
/// so implementations may do synchronous I/O.
pub trait SnapshotSource: Send + Sync + 'static {
    fn snapshot(&self) -> Result<Snapshot, SnapshotError>;
}

impl<F> SnapshotSource for F
where
    F: Fn() -> Result<Snapshot, SnapshotError> + Send + Sync + 'static,
{
    fn snapshot(&self) -> Result<Snapshot, SnapshotError> {
        self()
    }
}

// Runtime toggles (read once)
fn temp_enabled() -> bool {
    static ON: OnceCell<bool> = OnceCell::new();
    *ON.get_or_init(|| {
        std::env::var("PIMON_AGENT_TEMP")
            .map(|v| v != "0")
            .unwrap_or(true)
    })
}

pub fn now_rfc3339() -> Result<String, time::error::Format> {
    OffsetDateTime::now_utc().format(&Rfc3339)
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// `part / whole` as a percentage, `None` when `whole` is zero.
pub fn percent(part: u64, whole: u64) -> Option<f64> {
    if whole == 0 {
        return None;
    }
    Some(round2(part as f64 / whole as f64 * 100.0))
}

/// Approximate CPU load from the 1-minute load average spread over `cores`,
/// capped at 100%. Zero when no load average is readable.
pub fn fallback_load(load_avg_1: Option<f64>, cores: usize) -> f64 {
    match load_avg_1 {
        Some(load) if load.is_finite() && load >= 0.0 && cores > 0 => {
            round2((load / cores as f64 * 100.0).min(100.0))
        }
        _ => 0.0,
    }
}

/// Uses the measured load when it is positive, otherwise the load-average
/// estimate.
pub fn cpu_load_with_fallback(primary: Option<f64>, load_avg_1: Option<f64>, cores: usize) -> f64 {
    match primary {
        Some(load) if load.is_finite() && load > 0.0 => round2(load),
        _ => fallback_load(load_avg_1, cores),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryReading {
    pub total: u64,
    pub available: u64,
    pub used: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiskReading {
    pub fs: String,
    pub mount: String,
    pub size: u64,
    pub available: u64,
}

/// Raw readings as gathered, each possibly missing. Converted into a wire
/// `Snapshot` exactly once by [`PartialSnapshot::into_snapshot`].
#[derive(Debug, Clone, Default)]
pub struct PartialSnapshot {
    pub timestamp: Option<String>,
    pub cpu_load: Option<f64>,
    pub load_avg_1: Option<f64>,
    pub cores: usize,
    pub memory: Option<MemoryReading>,
    pub disks: Option<Vec<DiskReading>>,
    pub temperature: Option<TemperatureInfo>,
}

impl PartialSnapshot {
    /// Memory is the only mandatory reading. Missing disks and temperatures
    /// become empty/null fields; missing CPU load falls back to load average.
    pub fn into_snapshot(self) -> Result<Snapshot, SnapshotError> {
        let mem = self.memory.ok_or(SnapshotError::Unavailable("memory"))?;
        let timestamp = match self.timestamp {
            Some(ts) => ts,
            None => now_rfc3339()?,
        };
        let disk = self
            .disks
            .unwrap_or_default()
            .into_iter()
            .map(|d| {
                let used = d.size.saturating_sub(d.available);
                DiskInfo {
                    fs: d.fs,
                    mount: d.mount,
                    size: d.size,
                    used,
                    use_percent: percent(used, d.size),
                }
            })
            .collect();
        Ok(Snapshot {
            timestamp,
            cpu: CpuInfo {
                avg_load1: self.load_avg_1.map(round2),
                current_load: cpu_load_with_fallback(self.cpu_load, self.load_avg_1, self.cores),
            },
            memory: MemoryInfo {
                total: mem.total,
                free: mem.available,
                used: mem.used,
                used_percent: percent(mem.used, mem.total),
            },
            disk,
            temperature: self.temperature.unwrap_or_default(),
        })
    }
}

/// Snapshot source backed by persistent sysinfo handles, so CPU usage is a
/// delta between consecutive ticks.
pub struct SysinfoSource {
    sys: Mutex<System>,
    disks: Mutex<Disks>,
    components: Mutex<Components>,
}

impl SysinfoSource {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        Self {
            sys: Mutex::new(sys),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
            components: Mutex::new(Components::new_with_refreshed_list()),
        }
    }

    fn read(&self) -> PartialSnapshot {
        let (cpu_load, cores, memory) = {
            let mut sys = self.sys.lock().unwrap_or_else(PoisonError::into_inner);
            sys.refresh_cpu_usage();
            sys.refresh_memory();
            let total = sys.total_memory();
            let memory = (total > 0).then(|| {
                let available = sys.available_memory();
                MemoryReading {
                    total,
                    available,
                    used: total.saturating_sub(available),
                }
            });
            (
                Some(f64::from(sys.global_cpu_usage())),
                sys.cpus().len(),
                memory,
            )
        };

        let load_avg_1 = if cfg!(windows) {
            None
        } else {
            Some(System::load_average().one)
        };

        let disks = {
            let mut disks = self.disks.lock().unwrap_or_else(PoisonError::into_inner);
            disks.refresh(true);
            disks
                .list()
                .iter()
                .filter(|d| d.total_space() > 0)
                .map(|d| DiskReading {
                    fs: d.name().to_string_lossy().into_owned(),
                    mount: display_path(d.mount_point()),
                    size: d.total_space(),
                    available: d.available_space(),
                })
                .collect()
        };

        let temperature = temp_enabled().then(|| {
            let mut components = self.components.lock().unwrap_or_else(PoisonError::into_inner);
            components.refresh(false);
            read_temperatures(&components)
        });

        PartialSnapshot {
            timestamp: None,
            cpu_load,
            load_avg_1,
            cores,
            memory,
            disks: Some(disks),
            temperature,
        }
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSource for SysinfoSource {
    fn snapshot(&self) -> Result<Snapshot, SnapshotError> {
        self.read().into_snapshot()
    }
}

fn display_path(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

/// What a temperature sensor label describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SensorKind {
    Core,
    Package,
    Other,
}

// Labels look like "coretemp Core 0", "coretemp Package id 0" or "k10temp Tctl";
// the first word is the hwmon device.
fn classify(label: &str) -> SensorKind {
    let label = label.to_ascii_lowercase();
    let words: Vec<&str> = label.split_whitespace().collect();
    let is_core = words
        .windows(2)
        .any(|w| w[0] == "core" && w[1].parse::<u32>().is_ok());
    if is_core {
        return SensorKind::Core;
    }
    let is_package = words.iter().any(|w| {
        matches!(*w, "package" | "tctl" | "tdie")
            || w.starts_with("cpu")
            || w.starts_with("soc")
    });
    if is_package {
        SensorKind::Package
    } else {
        SensorKind::Other
    }
}

fn read_temperatures(components: &Components) -> TemperatureInfo {
    let mut main: Option<f32> = None;
    let mut cores = Vec::new();
    for c in components.iter() {
        let Some(t) = c.temperature().filter(|t| t.is_finite()) else {
            continue;
        };
        match classify(c.label()) {
            SensorKind::Core => cores.push(round2(f64::from(t))),
            SensorKind::Package => main = Some(main.map_or(t, |m| m.max(t))),
            SensorKind::Other => {}
        }
    }
    TemperatureInfo {
        main: main.map(|t| round2(f64::from(t))),
        cores,
    }
}
