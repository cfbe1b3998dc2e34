//! Tool availability detection
//!
//! Detects whether the external programs the converter shells out to are
//! reachable:
//! - Transcoding (the configured ffmpeg binary)
//! - Temperature sampling (powermetrics or hardware sensors via sysinfo)

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::telemetry::TelemetryKind;

/// Supported capability types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityType {
    Transcoding,
    TemperatureSampling,
}

/// Capability detection result
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityInfo {
    pub capability_type: CapabilityType,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CapabilityInfo {
    fn found(capability_type: CapabilityType, location: Option<PathBuf>) -> Self {
        Self {
            capability_type,
            available: true,
            location,
            reason: None,
        }
    }

    fn missing(capability_type: CapabilityType, reason: String) -> Self {
        Self {
            capability_type,
            available: false,
            location: None,
            reason: Some(reason),
        }
    }
}

/// Capability detector for one configuration
pub struct CapabilityDetector;

impl CapabilityDetector {
    /// Detect every capability for the given ffmpeg program and sampler
    pub fn detect_all(ffmpeg_bin: &str, telemetry: TelemetryKind) -> Vec<CapabilityInfo> {
        let capabilities = vec![
            Self::detect_transcoding(ffmpeg_bin),
            Self::detect_temperature_sampling(telemetry),
        ];

        let available_count = capabilities.iter().filter(|c| c.available).count();
        debug!(
            "Detected {}/{} capabilities available",
            available_count,
            capabilities.len()
        );
        capabilities
    }

    pub fn detect_transcoding(ffmpeg_bin: &str) -> CapabilityInfo {
        match Self::locate(ffmpeg_bin) {
            Some(path) => CapabilityInfo::found(CapabilityType::Transcoding, Some(path)),
            None => CapabilityInfo::missing(
                CapabilityType::Transcoding,
                format!("{} not found on PATH", ffmpeg_bin),
            ),
        }
    }

    pub fn detect_temperature_sampling(telemetry: TelemetryKind) -> CapabilityInfo {
        match telemetry {
            TelemetryKind::Powermetrics => match Self::locate("powermetrics") {
                Some(path) => {
                    CapabilityInfo::found(CapabilityType::TemperatureSampling, Some(path))
                }
                None => CapabilityInfo::missing(
                    CapabilityType::TemperatureSampling,
                    "powermetrics not found on PATH".to_string(),
                ),
            },
            // sysinfo reads sensors in-process
            TelemetryKind::Sysinfo => {
                CapabilityInfo::found(CapabilityType::TemperatureSampling, None)
            }
        }
    }

    /// Resolve `program` the way a spawned command would: explicit paths are
    /// checked directly, bare names are looked up on PATH
    pub fn locate(program: &str) -> Option<PathBuf> {
        let candidate = Path::new(program);
        if candidate.components().count() > 1 {
            return candidate.is_file().then(|| candidate.to_path_buf());
        }
        which::which(program).ok()
    }
}
