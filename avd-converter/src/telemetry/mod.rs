//! Hardware temperature telemetry
//!
//! Provides the CPU/GPU readings the temperature monitor compares against
//! its thresholds:
//! - `PowermetricsSource`: macOS `powermetrics` SMC sampler, run through a `CommandRunner`
//! - `SysinfoSource`: hardware components exposed by the `sysinfo` crate
//!
//! Both are slow and unreliable; every failure is a `TelemetryError` the
//! monitor treats as transient.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};
use sysinfo::Components;
use thiserror::Error;
use tracing::debug;

use crate::execution::{CommandRunner, ExecutionError};

/// Sensor channel of a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorChannel {
    Cpu,
    Gpu,
}

impl fmt::Display for SensorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorChannel::Cpu => write!(f, "CPU"),
            SensorChannel::Gpu => write!(f, "GPU"),
        }
    }
}

/// One temperature value in degrees Celsius
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemperatureReading {
    pub channel: SensorChannel,
    pub celsius: f64,
    pub taken_at: DateTime<Utc>,
}

/// Both channels from a single poll
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemperatureSample {
    pub cpu: TemperatureReading,
    pub gpu: TemperatureReading,
}

impl TemperatureSample {
    /// Sample stamped with the current time
    pub fn now(cpu_celsius: f64, gpu_celsius: f64) -> Self {
        let taken_at = Utc::now();
        Self {
            cpu: TemperatureReading {
                channel: SensorChannel::Cpu,
                celsius: cpu_celsius,
                taken_at,
            },
            gpu: TemperatureReading {
                channel: SensorChannel::Gpu,
                celsius: gpu_celsius,
                taken_at,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry command failed: {0}")]
    Command(#[from] ExecutionError),
    #[error("telemetry command exited with status {exit_code:?}: {stderr}")]
    NonZeroExit { exit_code: Option<i32>, stderr: String },
    #[error("no {0} temperature in telemetry output")]
    MissingChannel(SensorChannel),
    #[error("unparseable {channel} temperature '{raw}'")]
    Unparseable { channel: SensorChannel, raw: String },
}

/// Provider of CPU/GPU temperature samples
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn sample(&self) -> Result<TemperatureSample, TelemetryError>;

    /// Human readable name used in logs and the capability report
    fn name(&self) -> &str;
}

/// Which telemetry backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryKind {
    Powermetrics,
    Sysinfo,
}

impl TelemetryKind {
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            TelemetryKind::Powermetrics
        } else {
            TelemetryKind::Sysinfo
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "powermetrics" => Some(TelemetryKind::Powermetrics),
            "sysinfo" => Some(TelemetryKind::Sysinfo),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetryKind::Powermetrics => "powermetrics",
            TelemetryKind::Sysinfo => "sysinfo",
        }
    }

    /// Build the source for this backend
    pub fn build(&self, runner: Arc<dyn CommandRunner>) -> Arc<dyn TelemetrySource> {
        match self {
            TelemetryKind::Powermetrics => Arc::new(PowermetricsSource::new(runner)),
            TelemetryKind::Sysinfo => Arc::new(SysinfoSource::new()),
        }
    }
}

/// `sudo powermetrics --samplers smc -i1 -n1`
pub struct PowermetricsSource {
    runner: Arc<dyn CommandRunner>,
}

impl PowermetricsSource {
    pub const PROGRAM: &'static str = "sudo";
    pub const ARGS: [&'static str; 5] = ["powermetrics", "--samplers", "smc", "-i1", "-n1"];

    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Extract both die temperatures from powermetrics text output
    pub fn parse_output(output: &str) -> Result<(f64, f64), TelemetryError> {
        static CPU_RE: OnceLock<Regex> = OnceLock::new();
        static GPU_RE: OnceLock<Regex> = OnceLock::new();

        let cpu_re = CPU_RE.get_or_init(|| {
            Regex::new(r"CPU die temperature:\s+([\d.]+)\s+C").expect("valid CPU regex")
        });
        let gpu_re = GPU_RE.get_or_init(|| {
            Regex::new(r"GPU die temperature:\s+([\d.]+)\s+C").expect("valid GPU regex")
        });

        let cpu = Self::capture(cpu_re, output, SensorChannel::Cpu)?;
        let gpu = Self::capture(gpu_re, output, SensorChannel::Gpu)?;
        Ok((cpu, gpu))
    }

    fn capture(re: &Regex, output: &str, channel: SensorChannel) -> Result<f64, TelemetryError> {
        let raw = re
            .captures(output)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .ok_or(TelemetryError::MissingChannel(channel))?;

        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| TelemetryError::Unparseable {
                channel,
                raw: raw.to_string(),
            })
    }
}

#[async_trait]
impl TelemetrySource for PowermetricsSource {
    async fn sample(&self) -> Result<TemperatureSample, TelemetryError> {
        let args: Vec<String> = Self::ARGS.iter().map(|s| s.to_string()).collect();
        let output = self.runner.run(Self::PROGRAM, &args).await?;

        if !output.success {
            return Err(TelemetryError::NonZeroExit {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        let (cpu, gpu) = Self::parse_output(&output.stdout)?;
        Ok(TemperatureSample::now(cpu, gpu))
    }

    fn name(&self) -> &str {
        "powermetrics"
    }
}

/// Hardware sensors exposed through `sysinfo::Components`
#[derive(Debug, Default)]
pub struct SysinfoSource;

impl SysinfoSource {
    const CPU_LABELS: [&'static str; 6] = ["cpu", "package", "core", "tctl", "k10temp", "coretemp"];
    const GPU_LABELS: [&'static str; 7] =
        ["gpu", "amdgpu", "nvidia", "nouveau", "radeon", "edge", "junction"];

    pub fn new() -> Self {
        Self
    }

    /// Which channel a component label belongs to; GPU labels win ties
    pub fn classify(label: &str) -> Option<SensorChannel> {
        let label = label.to_ascii_lowercase();
        if Self::GPU_LABELS.iter().any(|needle| label.contains(needle)) {
            Some(SensorChannel::Gpu)
        } else if Self::CPU_LABELS.iter().any(|needle| label.contains(needle)) {
            Some(SensorChannel::Cpu)
        } else {
            None
        }
    }

    /// Hottest valid reading per channel from `(label, celsius)` pairs
    pub fn reduce<'a, I>(components: I) -> Result<(f64, f64), TelemetryError>
    where
        I: IntoIterator<Item = (&'a str, f32)>,
    {
        let mut cpu: Option<f64> = None;
        let mut gpu: Option<f64> = None;

        for (label, celsius) in components {
            let celsius = celsius as f64;
            if !celsius.is_finite() || celsius <= 0.0 {
                continue;
            }
            let slot = match Self::classify(label) {
                Some(SensorChannel::Cpu) => &mut cpu,
                Some(SensorChannel::Gpu) => &mut gpu,
                None => continue,
            };
            *slot = Some(slot.map_or(celsius, |current| current.max(celsius)));
        }

        let cpu = cpu.ok_or(TelemetryError::MissingChannel(SensorChannel::Cpu))?;
        let gpu = gpu.ok_or(TelemetryError::MissingChannel(SensorChannel::Gpu))?;
        Ok((cpu, gpu))
    }
}

#[async_trait]
impl TelemetrySource for SysinfoSource {
    async fn sample(&self) -> Result<TemperatureSample, TelemetryError> {
        // Sensor enumeration touches sysfs/IOKit, keep it off the runtime threads
        let readings = tokio::task::spawn_blocking(|| {
            let components = Components::new_with_refreshed_list();
            components
                .iter()
                .map(|c| (c.label().to_string(), c.temperature()))
                .collect::<Vec<_>>()
        })
        .await
        .unwrap_or_default();

        debug!("sysinfo exposed {} temperature components", readings.len());

        let (cpu, gpu) = Self::reduce(readings.iter().map(|(l, t)| (l.as_str(), *t)))?;
        Ok(TemperatureSample::now(cpu, gpu))
    }

    fn name(&self) -> &str {
        "sysinfo"
    }
}
