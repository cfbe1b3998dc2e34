//! AVD Converter - temperature-gated batch video conversion
//!
//! Converts every file under an import directory with ffmpeg while a
//! background monitor samples CPU/GPU temperatures:
//! - `monitor` polls a `TelemetrySource` and trips the cancellation signal on overheat
//! - `batch` runs work items one at a time and skips the rest once cancelled
//! - `execution` wraps external processes behind the `CommandRunner` trait
//! - `session` wires both halves together for one `convert` run

pub mod batch;
pub mod cancellation;
pub mod capabilities;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod execution;
pub mod job;
pub mod logging;
pub mod monitor;
pub mod session;
pub mod telemetry;

pub use batch::{BatchProcessor, BatchResult, ItemOutcome, ItemReport};
pub use cancellation::{CancellationSignal, SignalState};
pub use config::ConverterConfig;
pub use execution::{CommandOutput, CommandRunner, ExecutionError, SystemCommandRunner, Transcoder};
pub use job::{Directive, TransformOptions, WorkItem};
pub use logging::{LogLevel, LogRecord, NoopSink, StructuredSink, TracingSink};
pub use monitor::{MonitorExit, MonitorHandle, TemperatureMonitor, ThresholdConfig};
pub use session::{ConvertSession, SessionReport};
pub use telemetry::{TelemetryError, TelemetryKind, TelemetrySource, TemperatureSample};
