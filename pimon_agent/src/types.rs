//! Data types sent to stream subscribers.
//! Field names here are the JSON contract with the dashboard.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CpuInfo {
    // 1-minute system load average; null where the platform has none
    #[serde(default)]
    pub avg_load1: Option<f64>,
    pub current_load: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryInfo {
    pub total: u64,
    // available memory, not just unused pages
    pub free: u64,
    pub used: u64,
    #[serde(default)]
    pub used_percent: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiskInfo {
    pub fs: String,
    pub mount: String,
    pub size: u64,
    pub used: u64,
    #[serde(default)]
    pub use_percent: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct TemperatureInfo {
    #[serde(default)]
    pub main: Option<f64>,
    #[serde(default)]
    pub cores: Vec<f64>,
}

/// One best-effort telemetry reading, published on the `metrics` topic.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Snapshot {
    pub timestamp: String,
    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
    pub disk: Vec<DiskInfo>,
    pub temperature: TemperatureInfo,
}

/// Body of an `event: error` frame.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorPayload {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Stdout,
    Stderr,
    System,
}

/// One line of subprocess output (or a relay status line).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub source: LogSource,
    pub text: String,
}

impl LogLine {
    pub fn new(source: LogSource, text: impl Into<String>) -> Self {
        let mut text = text.into();
        if text.contains('\r') {
            text.retain(|c| c != '\r');
        }
        Self { source, text }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(LogSource::System, text)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HealthPayload {
    pub ok: bool,
    pub time: String,
}
