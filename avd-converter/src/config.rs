//! Configuration loading
//!
//! Handles:
//! - `.env` style file (KEY=VALUE) as the base layer
//! - Process environment overriding the file
//! - Defaults for every key left unset
//! - Validation of numeric values and thresholds

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::monitor::ThresholdConfig;
use crate::telemetry::TelemetryKind;

pub const DEFAULT_IMPORT_DIR: &str = "./input";
pub const DEFAULT_EXPORT_DIR: &str = "./output";
pub const DEFAULT_LOG_FILE: &str = "./logs/videoconverter.log";
pub const DEFAULT_INFO_LOG_FILE: &str = "./logs/info.log";
pub const DEFAULT_MAX_CPU_TEMP: f64 = 80.0;
pub const DEFAULT_MAX_GPU_TEMP: f64 = 85.0;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_FFMPEG_BIN: &str = "ffmpeg";
/// Lower bound on a single telemetry call, whatever the poll interval
pub const MIN_TELEMETRY_TIMEOUT: Duration = Duration::from_secs(2);

/// Every key the converter reads
pub const KEYS: [&str; 10] = [
    "IMPORT_DIR",
    "EXPORT_DIR",
    "LOG_FILE",
    "INFO_LOG_FILE",
    "MAX_CPU_TEMP",
    "MAX_GPU_TEMP",
    "POLL_INTERVAL_SECS",
    "FFMPEG_BIN",
    "TELEMETRY_SOURCE",
    "TRANSCODE_TIMEOUT_SECS",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("{key} must be a finite, non-negative number (got {value})")]
    InvalidThreshold { key: &'static str, value: f64 },
    #[error("POLL_INTERVAL_SECS must be greater than zero")]
    ZeroPollInterval,
}

/// Effective converter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConverterConfig {
    pub import_dir: PathBuf,
    pub export_dir: PathBuf,
    pub log_file: PathBuf,
    pub info_log_file: PathBuf,
    pub max_cpu_temp: f64,
    pub max_gpu_temp: f64,
    pub poll_interval_secs: u64,
    pub ffmpeg_bin: String,
    pub telemetry_source: TelemetryKind,
    pub transcode_timeout_secs: Option<u64>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            import_dir: PathBuf::from(DEFAULT_IMPORT_DIR),
            export_dir: PathBuf::from(DEFAULT_EXPORT_DIR),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            info_log_file: PathBuf::from(DEFAULT_INFO_LOG_FILE),
            max_cpu_temp: DEFAULT_MAX_CPU_TEMP,
            max_gpu_temp: DEFAULT_MAX_GPU_TEMP,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            ffmpeg_bin: DEFAULT_FFMPEG_BIN.to_string(),
            telemetry_source: TelemetryKind::platform_default(),
            transcode_timeout_secs: None,
        }
    }
}

impl ConverterConfig {
    /// Load from `env_file` with process environment taking precedence.
    ///
    /// A missing file only produces a warning on stderr; defaults apply.
    pub fn load(env_file: &Path) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();

        if env_file.exists() {
            let iter = dotenvy::from_path_iter(env_file).map_err(|e| ConfigError::Read {
                path: env_file.display().to_string(),
                message: e.to_string(),
            })?;
            for item in iter {
                let (key, value) = item.map_err(|e| ConfigError::Read {
                    path: env_file.display().to_string(),
                    message: e.to_string(),
                })?;
                values.insert(key, value);
            }
        } else {
            eprintln!(
                "Warning: could not read config file {}, using defaults",
                env_file.display()
            );
        }

        for key in KEYS {
            if let Ok(value) = std::env::var(key) {
                values.insert(key.to_string(), value);
            }
        }

        Self::from_lookup(|key| values.get(key).cloned())
    }

    /// Build from a key lookup; unset or blank keys fall back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let config = Self {
            import_dir: get("IMPORT_DIR").map(PathBuf::from).unwrap_or(defaults.import_dir),
            export_dir: get("EXPORT_DIR").map(PathBuf::from).unwrap_or(defaults.export_dir),
            log_file: get("LOG_FILE").map(PathBuf::from).unwrap_or(defaults.log_file),
            info_log_file: get("INFO_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.info_log_file),
            max_cpu_temp: parse_number(get("MAX_CPU_TEMP"), "MAX_CPU_TEMP")?
                .unwrap_or(defaults.max_cpu_temp),
            max_gpu_temp: parse_number(get("MAX_GPU_TEMP"), "MAX_GPU_TEMP")?
                .unwrap_or(defaults.max_gpu_temp),
            poll_interval_secs: parse_number(get("POLL_INTERVAL_SECS"), "POLL_INTERVAL_SECS")?
                .unwrap_or(defaults.poll_interval_secs),
            ffmpeg_bin: get("FFMPEG_BIN").unwrap_or(defaults.ffmpeg_bin),
            telemetry_source: match get("TELEMETRY_SOURCE") {
                Some(raw) => TelemetryKind::parse(&raw).ok_or(ConfigError::InvalidValue {
                    key: "TELEMETRY_SOURCE",
                    value: raw,
                })?,
                None => defaults.telemetry_source,
            },
            transcode_timeout_secs: parse_number(
                get("TRANSCODE_TIMEOUT_SECS"),
                "TRANSCODE_TIMEOUT_SECS",
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("MAX_CPU_TEMP", self.max_cpu_temp),
            ("MAX_GPU_TEMP", self.max_gpu_temp),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidThreshold { key, value });
            }
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        Ok(())
    }

    pub fn thresholds(&self) -> ThresholdConfig {
        ThresholdConfig::new(self.max_cpu_temp, self.max_gpu_temp)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn transcode_timeout(&self) -> Option<Duration> {
        self.transcode_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Bound on one telemetry call, tied to the poll interval
    pub fn telemetry_timeout(&self) -> Duration {
        self.poll_interval().max(MIN_TELEMETRY_TIMEOUT)
    }

    /// Effective configuration rendered as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn parse_number<T: std::str::FromStr>(
    raw: Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    raw.map(|value| {
        value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { key, value })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ConverterConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.import_dir, PathBuf::from("./input"));
        assert_eq!(config.export_dir, PathBuf::from("./output"));
        assert_eq!(config.log_file, PathBuf::from("./logs/videoconverter.log"));
        assert_eq!(config.info_log_file, PathBuf::from("./logs/info.log"));
        assert_eq!(config.max_cpu_temp, 80.0);
        assert_eq!(config.max_gpu_temp, 85.0);
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.ffmpeg_bin, "ffmpeg");
        assert_eq!(config.transcode_timeout(), None);
    }

    #[test]
    fn test_values_override_defaults() {
        let config = ConverterConfig::from_lookup(lookup_from(&[
            ("IMPORT_DIR", "/media/in"),
            ("MAX_CPU_TEMP", "72.5"),
            ("POLL_INTERVAL_SECS", "3"),
            ("TELEMETRY_SOURCE", "powermetrics"),
            ("TRANSCODE_TIMEOUT_SECS", "600"),
        ]))
        .unwrap();

        assert_eq!(config.import_dir, PathBuf::from("/media/in"));
        assert_eq!(config.max_cpu_temp, 72.5);
        assert_eq!(config.max_gpu_temp, 85.0);
        assert_eq!(config.poll_interval_secs, 3);
        assert_eq!(config.telemetry_source, TelemetryKind::Powermetrics);
        assert_eq!(config.transcode_timeout(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_telemetry_timeout_follows_poll_interval() {
        let config = ConverterConfig::from_lookup(lookup_from(&[
            ("POLL_INTERVAL_SECS", "5"),
            ("TRANSCODE_TIMEOUT_SECS", "600"),
        ]))
        .unwrap();
        assert_eq!(config.telemetry_timeout(), Duration::from_secs(5));

        let fast = ConverterConfig::from_lookup(lookup_from(&[("POLL_INTERVAL_SECS", "1")])).unwrap();
        assert_eq!(fast.telemetry_timeout(), MIN_TELEMETRY_TIMEOUT);
    }

    #[test]
    fn test_blank_value_uses_default() {
        let config = ConverterConfig::from_lookup(lookup_from(&[("MAX_GPU_TEMP", "  ")])).unwrap();
        assert_eq!(config.max_gpu_temp, 85.0);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = ConverterConfig::from_lookup(lookup_from(&[("MAX_CPU_TEMP", "hot")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "MAX_CPU_TEMP", .. }));
    }

    #[test]
    fn test_negative_threshold_is_rejected() {
        let err = ConverterConfig::from_lookup(lookup_from(&[("MAX_GPU_TEMP", "-5")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreshold { key: "MAX_GPU_TEMP", .. }));
    }

    #[test]
    fn test_non_finite_threshold_is_rejected() {
        let err = ConverterConfig::from_lookup(lookup_from(&[("MAX_CPU_TEMP", "NaN")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreshold { key: "MAX_CPU_TEMP", .. }));
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let err =
            ConverterConfig::from_lookup(lookup_from(&[("POLL_INTERVAL_SECS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroPollInterval));
    }

    #[test]
    fn test_unknown_telemetry_source() {
        let err =
            ConverterConfig::from_lookup(lookup_from(&[("TELEMETRY_SOURCE", "ipmi")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "TELEMETRY_SOURCE", .. }));
    }

    #[test]
    fn test_load_reads_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("converter.env");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "# converter settings").unwrap();
        writeln!(file, "EXPORT_DIR=/tmp/avd-export-test").unwrap();
        writeln!(file, "FFMPEG_BIN=/opt/ffmpeg/bin/ffmpeg").unwrap();

        let config = ConverterConfig::load(&path).unwrap();
        // The process environment wins over the file
        if std::env::var("FFMPEG_BIN").is_err() {
            assert_eq!(config.ffmpeg_bin, "/opt/ffmpeg/bin/ffmpeg");
        }
        if std::env::var("EXPORT_DIR").is_err() {
            assert_eq!(config.export_dir, PathBuf::from("/tmp/avd-export-test"));
        }
    }

    #[test]
    fn test_missing_env_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConverterConfig::load(&dir.path().join("absent.env"));
        assert!(config.is_ok());
    }

    #[test]
    fn test_toml_rendering() {
        let rendered = ConverterConfig::default().to_toml().unwrap();
        assert!(rendered.contains("import_dir = \"./input\""));
        assert!(rendered.contains("max_cpu_temp = 80.0"));
        assert!(rendered.contains("poll_interval_secs = 10"));
    }
}
