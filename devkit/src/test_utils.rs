/*!
Test harness for conversion pipelines

Provides:
- Temporary import/export directories
- Input file helpers
- One-call batch and session runs over scripted collaborators
*/

use anyhow::{Context, Result};
use avd_converter::batch::{BatchProcessor, BatchResult};
use avd_converter::cancellation::CancellationSignal;
use avd_converter::config::ConverterConfig;
use avd_converter::discovery;
use avd_converter::execution::Transcoder;
use avd_converter::job::{TransformOptions, WorkItem};
use avd_converter::session::{ConvertSession, SessionReport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use crate::runner_stub::ScriptedRunner;
use crate::sink_stub::RecordingSink;
use crate::telemetry_stub::ScriptedTelemetry;

/// Temporary workspace with scripted collaborators
pub struct TestHarness {
    import: TempDir,
    export: TempDir,
    pub runner: ScriptedRunner,
    pub sink: RecordingSink,
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        Ok(Self {
            import: TempDir::new().context("Failed to create import dir")?,
            export: TempDir::new().context("Failed to create export dir")?,
            runner: ScriptedRunner::new(),
            sink: RecordingSink::new(),
        })
    }

    /// Replace the runner, e.g. with one carrying failure rules
    pub fn with_runner(mut self, runner: ScriptedRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn import_dir(&self) -> &Path {
        self.import.path()
    }

    pub fn export_dir(&self) -> &Path {
        self.export.path()
    }

    /// Create `relative` under the import dir with `size` bytes of content
    pub fn create_file(&self, relative: &str, size: usize) -> Result<PathBuf> {
        let path = self.import.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, vec![0u8; size])
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn create_files(&self, names: &[&str]) -> Result<Vec<PathBuf>> {
        names.iter().map(|name| self.create_file(name, 16)).collect()
    }

    /// Configuration pointing at the temporary directories
    pub fn config(&self) -> ConverterConfig {
        ConverterConfig {
            import_dir: self.import.path().to_path_buf(),
            export_dir: self.export.path().to_path_buf(),
            ..ConverterConfig::default()
        }
    }

    /// Discover the import dir and build one work item per file
    pub fn work_items(&self, options: &TransformOptions) -> Vec<WorkItem> {
        discovery::discover_work(self.import.path(), &self.sink)
            .into_iter()
            .map(|input| WorkItem::new(input, self.export.path(), options))
            .collect()
    }

    /// Run the batch processor alone against `signal`
    pub async fn run_batch(
        &self,
        options: &TransformOptions,
        signal: CancellationSignal,
    ) -> BatchResult {
        let sink = Arc::new(self.sink.clone());
        let transcoder = Transcoder::new(Arc::new(self.runner.clone()), "ffmpeg", sink.clone());
        BatchProcessor::new(transcoder, signal, sink)
            .run(self.work_items(options))
            .await
    }

    /// Run a full session (monitor plus processor) with `telemetry`
    pub async fn run_session(
        &self,
        options: TransformOptions,
        telemetry: ScriptedTelemetry,
        poll_interval: Duration,
    ) -> Result<SessionReport> {
        ConvertSession::new(self.config(), options, Arc::new(self.sink.clone()))
            .with_runner(Arc::new(self.runner.clone()))
            .with_telemetry(Arc::new(telemetry))
            .with_poll_interval(poll_interval)
            .run()
            .await
    }
}
