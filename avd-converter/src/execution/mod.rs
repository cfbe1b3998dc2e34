//! External process execution for the converter
//!
//! Handles every call to an outside binary:
//! - `CommandRunner` trait, the injectable seam used by tests
//! - `SystemCommandRunner`, the tokio-backed runner with an optional timeout
//! - `Transcoder`, the ffmpeg front-end used by the batch processor

use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use crate::logging::{LogRecord, StructuredSink};

/// Captured result of one external process
#[derive(Debug, Clone, Default, Serialize)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u128,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: Some(exit_code),
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    /// stdout followed by a `STDERR:` block when stderr is not empty
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\nSTDERR:\n{}", self.stdout, self.stderr)
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} timed out after {timeout_secs}s")]
    TimedOut { program: String, timeout_secs: u64 },
    #[error("{program} exited with status {exit_code:?}")]
    Failed {
        program: String,
        exit_code: Option<i32>,
        output: String,
    },
}

/// Runs external programs. Implemented by `SystemCommandRunner` in
/// production and by scripted fakes in tests.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, ExecutionError>;
}

/// Runner backed by `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner {
    timeout: Option<Duration>,
}

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the child and report `TimedOut` when it runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, ExecutionError> {
        let start_time = Instant::now();
        debug!("Executing {} {:?} (timeout: {:?})", program, args, self.timeout);

        let mut command = AsyncCommand::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, command.output())
                .await
                .map_err(|_| ExecutionError::TimedOut {
                    program: program.to_string(),
                    timeout_secs: limit.as_secs(),
                })?,
            None => command.output().await,
        }
        .map_err(|source| ExecutionError::Spawn {
            program: program.to_string(),
            source,
        })?;

        Ok(CommandOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }
}

/// ffmpeg front-end. Every call is opaque: it either succeeds or fails.
#[derive(Clone)]
pub struct Transcoder {
    runner: Arc<dyn CommandRunner>,
    program: String,
    sink: Arc<dyn StructuredSink>,
}

impl Transcoder {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        program: impl Into<String>,
        sink: Arc<dyn StructuredSink>,
    ) -> Self {
        Self {
            runner,
            program: program.into(),
            sink,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run ffmpeg with `args`; a non-zero exit becomes `ExecutionError::Failed`
    pub async fn transcode(&self, args: &[String]) -> Result<CommandOutput, ExecutionError> {
        self.sink
            .emit(LogRecord::info("Running ffmpeg").field("args", args.to_vec()));

        let output = match self.runner.run(&self.program, args).await {
            Ok(output) => output,
            Err(e) => {
                self.sink.emit(
                    LogRecord::error("ffmpeg error")
                        .field("error", e.to_string())
                        .field("output", ""),
                );
                return Err(e);
            }
        };

        if !output.success {
            let combined = output.combined();
            self.sink.emit(
                LogRecord::error("ffmpeg error")
                    .field("error", format!("exit status {:?}", output.exit_code))
                    .field("output", combined.clone()),
            );
            return Err(ExecutionError::Failed {
                program: self.program.clone(),
                exit_code: output.exit_code,
                output: combined,
            });
        }

        self.sink.emit(
            LogRecord::info("ffmpeg success")
                .field("output", output.combined())
                .field("execution_time_ms", output.execution_time_ms as u64),
        );
        Ok(output)
    }
}
