//! Structured logging for the converter
//!
//! Components never reach for a global logger. They receive an
//! `Arc<dyn StructuredSink>` and emit `LogRecord`s through it:
//! - `TracingSink` forwards records into `tracing` on the main or info channel
//! - `NoopSink` discards everything (tests, dry runs)
//!
//! `init` installs the subscriber that fans the two channels out to the
//! console and to their JSON log files.

mod format;
mod sink;

pub use format::JsonLineFormat;
pub use sink::{Channel, LogLevel, LogRecord, NoopSink, StructuredSink, TracingSink};

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing::Subscriber;
use tracing_subscriber::filter::{filter_fn, EnvFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// `tracing` target used by the main channel
pub const MAIN_TARGET: &str = "avd::main";
/// `tracing` target used by the info channel
pub const INFO_TARGET: &str = "avd::info";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to open log file {path}: {source}")]
    OpenFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Install the global subscriber.
///
/// Console output receives every record. `main_log` receives JSON lines for
/// everything except the info channel, `info_log` receives only the info channel.
pub fn init(main_log: &Path, info_log: &Path, default_level: &str) -> Result<(), LoggingError> {
    subscriber(main_log, info_log, default_level)?
        .try_init()
        .map_err(|e| LoggingError::Install(e.to_string()))
}

fn subscriber(
    main_log: &Path,
    info_log: &Path,
    default_level: &str,
) -> Result<impl Subscriber + Send + Sync + 'static, LoggingError> {
    let main_file = open_append(main_log)?;
    let info_file = open_append(info_log)?;

    let env_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };

    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(env_filter());

    let main_layer = tracing_subscriber::fmt::layer()
        .event_format(JsonLineFormat)
        .with_writer(Mutex::new(main_file))
        .with_filter(filter_fn(|meta| meta.target() != INFO_TARGET))
        .with_filter(env_filter());

    let info_layer = tracing_subscriber::fmt::layer()
        .event_format(JsonLineFormat)
        .with_writer(Mutex::new(info_file))
        .with_filter(filter_fn(|meta| meta.target() == INFO_TARGET))
        .with_filter(env_filter());

    Ok(tracing_subscriber::registry()
        .with(console)
        .with(main_layer)
        .with(info_layer))
}

fn open_append(path: &Path) -> Result<File, LoggingError> {
    let open_err = |source| LoggingError::OpenFile {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(open_err)?;
        }
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(open_err)
}
