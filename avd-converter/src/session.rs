//! One `convert` run: temperature monitor and batch processor sharing a
//! fresh cancellation signal.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::batch::{BatchProcessor, BatchResult};
use crate::cancellation::CancellationSignal;
use crate::config::ConverterConfig;
use crate::discovery;
use crate::execution::{CommandRunner, SystemCommandRunner, Transcoder};
use crate::job::{TransformOptions, WorkItem};
use crate::logging::{LogRecord, StructuredSink};
use crate::monitor::{MonitorExit, TemperatureMonitor};
use crate::telemetry::TelemetrySource;

/// Outcome of a finished session
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub result: BatchResult,
    pub monitor_exit: MonitorExit,
}

pub struct ConvertSession {
    config: ConverterConfig,
    options: TransformOptions,
    runner: Arc<dyn CommandRunner>,
    telemetry: Arc<dyn TelemetrySource>,
    sink: Arc<dyn StructuredSink>,
    poll_interval: Duration,
}

impl ConvertSession {
    /// Session backed by real processes and the configured telemetry source
    pub fn new(
        config: ConverterConfig,
        options: TransformOptions,
        sink: Arc<dyn StructuredSink>,
    ) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(transcode_runner(&config));
        let telemetry = config
            .telemetry_source
            .build(Arc::new(telemetry_runner(&config)));

        Self {
            poll_interval: config.poll_interval(),
            config,
            options,
            runner,
            telemetry,
            sink,
        }
    }

    /// Replace the runner used for ffmpeg calls
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySource>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Discover the import directory and convert every file.
    ///
    /// The monitor is always stopped before this returns, whether the batch
    /// completed or was cancelled.
    pub async fn run(self) -> Result<SessionReport> {
        let sink = self.sink;

        if let Some(raw) = self.options.unrecognized_orientation() {
            sink.emit(
                LogRecord::warn("Unrecognized orientation, no rotation applied")
                    .field("orientation", raw),
            );
        }

        let signal = CancellationSignal::new();
        let monitor = TemperatureMonitor::new(
            self.poll_interval,
            self.config.thresholds(),
            self.telemetry,
            signal.clone(),
            sink.clone(),
        )
        .spawn();

        let import_dir = self.config.import_dir.clone();
        let discovery_sink = sink.clone();
        let inputs: Vec<PathBuf> = match tokio::task::spawn_blocking(move || {
            discovery::discover_work(&import_dir, discovery_sink.as_ref())
        })
        .await
        {
            Ok(inputs) => inputs,
            Err(e) => {
                monitor.shutdown().await;
                return Err(e).context("Discovery task failed");
            }
        };

        let items: Vec<WorkItem> = inputs
            .into_iter()
            .map(|input| WorkItem::new(input, &self.config.export_dir, &self.options))
            .collect();

        sink.emit(
            LogRecord::info("Starting convert command")
                .field("import_dir", self.config.import_dir.display().to_string())
                .field("export_dir", self.config.export_dir.display().to_string())
                .field("files", items.len() as u64),
        );

        let transcoder = Transcoder::new(self.runner, self.config.ffmpeg_bin.clone(), sink.clone());
        let processor = BatchProcessor::new(transcoder, signal, sink.clone());

        let result = match tokio::fs::create_dir_all(&self.config.export_dir).await {
            Ok(()) => processor.run(items).await,
            Err(e) => {
                let cause = format!(
                    "failed to create export directory {}: {}",
                    self.config.export_dir.display(),
                    e
                );
                sink.emit(LogRecord::error("Export directory unavailable").field("error", cause.clone()));
                processor.fail_all(items, &cause)
            }
        };

        let monitor_exit = monitor.shutdown().await;

        let counts = result.counts();
        sink.emit(
            LogRecord::info("Convert command finished")
                .field("total", counts.total as u64)
                .field("succeeded", counts.succeeded as u64)
                .field("failed", counts.failed as u64)
                .field("skipped", counts.skipped as u64)
                .field(
                    "cancellation",
                    result.cancellation.clone().map_or(serde_json::Value::Null, Into::into),
                ),
        );

        Ok(SessionReport {
            result,
            monitor_exit,
        })
    }
}

/// Runner for ffmpeg calls, bounded by `TRANSCODE_TIMEOUT_SECS` when set
fn transcode_runner(config: &ConverterConfig) -> SystemCommandRunner {
    let runner = SystemCommandRunner::new();
    match config.transcode_timeout() {
        Some(timeout) => runner.with_timeout(timeout),
        None => runner,
    }
}

/// Runner for the temperature sampler, bounded near the poll interval
fn telemetry_runner(config: &ConverterConfig) -> SystemCommandRunner {
    SystemCommandRunner::new().with_timeout(config.telemetry_timeout())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::ItemOutcome;
    use crate::execution::{CommandOutput, ExecutionError};
    use crate::logging::NoopSink;
    use crate::telemetry::{TelemetryError, TemperatureSample};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct OkRunner(Mutex<usize>);

    #[async_trait]
    impl CommandRunner for OkRunner {
        async fn run(&self, _program: &str, _args: &[String]) -> Result<CommandOutput, ExecutionError> {
            *self.0.lock().unwrap() += 1;
            Ok(CommandOutput::ok(""))
        }
    }

    struct Cool;

    #[async_trait]
    impl TelemetrySource for Cool {
        async fn sample(&self) -> Result<TemperatureSample, TelemetryError> {
            Ok(TemperatureSample::now(40.0, 35.0))
        }

        fn name(&self) -> &str {
            "cool"
        }
    }

    #[tokio::test]
    async fn test_session_converts_and_stops_monitor() {
        let import = TempDir::new().unwrap();
        let export = TempDir::new().unwrap();
        std::fs::write(import.path().join("a.mov"), b"a").unwrap();
        std::fs::write(import.path().join("b.mov"), b"b").unwrap();

        let config = ConverterConfig {
            import_dir: import.path().to_path_buf(),
            export_dir: export.path().join("nested"),
            ..ConverterConfig::default()
        };
        let runner = Arc::new(OkRunner(Mutex::new(0)));

        let report = ConvertSession::new(config, TransformOptions::default(), Arc::new(NoopSink))
            .with_runner(runner.clone())
            .with_telemetry(Arc::new(Cool))
            .with_poll_interval(Duration::from_secs(60))
            .run()
            .await
            .unwrap();

        assert_eq!(report.result.outcomes(), vec![&ItemOutcome::Success; 2]);
        assert_eq!(report.monitor_exit, MonitorExit::Stopped);
        assert_eq!(*runner.0.lock().unwrap(), 2);
        assert!(export.path().join("nested").is_dir());
    }

    #[tokio::test]
    async fn test_unusable_export_dir_fails_every_item() {
        let import = TempDir::new().unwrap();
        let export = TempDir::new().unwrap();
        std::fs::write(import.path().join("a.mov"), b"a").unwrap();
        std::fs::write(import.path().join("b.mov"), b"b").unwrap();
        // A regular file where the export directory should be
        let blocked = export.path().join("taken");
        std::fs::write(&blocked, b"").unwrap();

        let config = ConverterConfig {
            import_dir: import.path().to_path_buf(),
            export_dir: blocked.join("out"),
            ..ConverterConfig::default()
        };
        let runner = Arc::new(OkRunner(Mutex::new(0)));

        let report = ConvertSession::new(config, TransformOptions::default(), Arc::new(NoopSink))
            .with_runner(runner.clone())
            .with_telemetry(Arc::new(Cool))
            .run()
            .await
            .unwrap();

        assert_eq!(report.result.items.len(), 2);
        assert!(report
            .result
            .outcomes()
            .iter()
            .all(|o| matches!(o, ItemOutcome::Failure { cause } if cause.contains("export directory"))));
        assert_eq!(report.result.exit_code(), 1);
        assert_eq!(report.monitor_exit, MonitorExit::Stopped);
        assert_eq!(*runner.0.lock().unwrap(), 0);
    }

    #[test]
    fn test_telemetry_runner_ignores_transcode_timeout() {
        let config = ConverterConfig {
            poll_interval_secs: 10,
            transcode_timeout_secs: Some(600),
            ..ConverterConfig::default()
        };

        assert_eq!(transcode_runner(&config).timeout(), Some(Duration::from_secs(600)));
        assert_eq!(telemetry_runner(&config).timeout(), Some(Duration::from_secs(10)));
        assert_eq!(
            transcode_runner(&ConverterConfig::default()).timeout(),
            None
        );
    }

    #[tokio::test]
    async fn test_empty_import_dir_is_an_empty_batch() {
        let import = TempDir::new().unwrap();
        let export = TempDir::new().unwrap();
        let config = ConverterConfig {
            import_dir: import.path().join("missing"),
            export_dir: export.path().to_path_buf(),
            ..ConverterConfig::default()
        };

        let report = ConvertSession::new(config, TransformOptions::default(), Arc::new(NoopSink))
            .with_telemetry(Arc::new(Cool))
            .run()
            .await
            .unwrap();

        assert!(report.result.items.is_empty());
        assert_eq!(report.result.exit_code(), 0);
    }
}
