//! Sequential, cancellation-aware batch processor
//!
//! Items run one at a time in discovery order. The cancellation signal is
//! checked before each item; an in-flight ffmpeg call is never interrupted.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cancellation::{CancellationSignal, SignalState};
use crate::execution::Transcoder;
use crate::job::WorkItem;
use crate::logging::{LogRecord, StructuredSink};

/// Final state of one work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Success,
    Failure { cause: String },
    SkippedCancelled { reason: String },
}

impl ItemOutcome {
    /// Value of the `outcome` log field
    pub fn kind(&self) -> &'static str {
        match self {
            ItemOutcome::Success => "success",
            ItemOutcome::Failure { .. } => "failure",
            ItemOutcome::SkippedCancelled { .. } => "skipped",
        }
    }

    /// Whether the item was actually dispatched to ffmpeg
    pub fn ran(&self) -> bool {
        !matches!(self, ItemOutcome::SkippedCancelled { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemReport {
    pub input: PathBuf,
    pub output: PathBuf,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
    /// `None` when no extraction was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_extracted: Option<bool>,
}

/// Aggregate counts of a `BatchResult`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchCounts {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Per-item outcomes in discovery order plus the cancellation reason, if the
/// processor observed one
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchResult {
    pub items: Vec<ItemReport>,
    pub cancellation: Option<String>,
}

impl BatchResult {
    pub fn counts(&self) -> BatchCounts {
        let count = |kind: &str| self.items.iter().filter(|i| i.outcome.kind() == kind).count();
        BatchCounts {
            total: self.items.len(),
            succeeded: count("success"),
            failed: count("failure"),
            skipped: count("skipped"),
        }
    }

    pub fn outcomes(&self) -> Vec<&ItemOutcome> {
        self.items.iter().map(|i| &i.outcome).collect()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_some()
    }

    /// 2 when cancelled, 1 when any item failed, 0 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.is_cancelled() {
            2
        } else if self.counts().failed > 0 {
            1
        } else {
            0
        }
    }

    /// One-line human summary
    pub fn summary(&self) -> String {
        let counts = self.counts();
        let mut line = format!(
            "{} file(s): {} succeeded, {} failed, {} skipped",
            counts.total, counts.succeeded, counts.failed, counts.skipped
        );
        if let Some(reason) = &self.cancellation {
            line.push_str(&format!(" (cancelled: {})", reason));
        }
        line
    }

    /// Pretty JSON with the counts followed by every item
    pub fn to_report_json(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct Report<'a> {
            counts: BatchCounts,
            cancellation: Option<&'a str>,
            items: &'a [ItemReport],
        }

        serde_json::to_string_pretty(&Report {
            counts: self.counts(),
            cancellation: self.cancellation.as_deref(),
            items: &self.items,
        })
    }
}

/// Runs work items through the transcoder until the list is exhausted or
/// cancellation is observed
pub struct BatchProcessor {
    transcoder: Transcoder,
    signal: CancellationSignal,
    sink: Arc<dyn StructuredSink>,
}

impl BatchProcessor {
    pub fn new(
        transcoder: Transcoder,
        signal: CancellationSignal,
        sink: Arc<dyn StructuredSink>,
    ) -> Self {
        Self {
            transcoder,
            signal,
            sink,
        }
    }

    pub async fn run(&self, items: Vec<WorkItem>) -> BatchResult {
        let mut result = BatchResult {
            items: Vec::with_capacity(items.len()),
            cancellation: None,
        };
        let total = items.len();
        let mut pending = items.into_iter();

        while let Some(item) = pending.next() {
            if let SignalState::Cancelled(reason) = self.signal.observe() {
                let remaining = total - result.items.len();
                self.sink.emit(
                    LogRecord::error("Operation cancelled")
                        .field("reason", reason.clone())
                        .field("remaining", remaining as u64),
                );

                for skipped in std::iter::once(item).chain(pending.by_ref()) {
                    result.items.push(self.skip(skipped, &reason));
                }
                result.cancellation = Some(reason);
                break;
            }

            let report = self.process(item).await;
            result.items.push(report);
        }

        result
    }

    async fn process(&self, item: WorkItem) -> ItemReport {
        let input = item.input.display().to_string();

        let audio_extracted = match item.audio_extraction_args() {
            Some(args) => match self.transcoder.transcode(&args).await {
                Ok(_) => Some(true),
                Err(e) => {
                    self.sink.emit(
                        LogRecord::error("Failed to extract audio")
                            .field("input", input.clone())
                            .field("error", e.to_string()),
                    );
                    Some(false)
                }
            },
            None => None,
        };

        let outcome = match self.transcoder.transcode(&item.primary_args()).await {
            Ok(_) => {
                self.sink.emit(
                    LogRecord::info("File converted successfully")
                        .field("input", input)
                        .field("output", item.output.display().to_string())
                        .field("outcome", "success"),
                );
                ItemOutcome::Success
            }
            Err(e) => {
                let cause = e.to_string();
                self.sink.emit(
                    LogRecord::error("Conversion failed")
                        .field("input", input)
                        .field("outcome", "failure")
                        .field("cause", cause.clone()),
                );
                ItemOutcome::Failure { cause }
            }
        };

        ItemReport {
            input: item.input,
            output: item.output,
            outcome,
            audio_extracted,
        }
    }

    /// Account for every item as a failure without running any of them,
    /// e.g. when the export directory cannot be created
    pub fn fail_all(&self, items: Vec<WorkItem>, cause: &str) -> BatchResult {
        let items = items
            .into_iter()
            .map(|item| {
                self.sink.emit(
                    LogRecord::error("Conversion failed")
                        .field("input", item.input.display().to_string())
                        .field("outcome", "failure")
                        .field("cause", cause),
                );
                ItemReport {
                    input: item.input,
                    output: item.output,
                    outcome: ItemOutcome::Failure {
                        cause: cause.to_string(),
                    },
                    audio_extracted: None,
                }
            })
            .collect();

        BatchResult {
            items,
            cancellation: None,
        }
    }

    fn skip(&self, item: WorkItem, reason: &str) -> ItemReport {
        self.sink.emit(
            LogRecord::warn("Skipped due to cancellation")
                .field("input", item.input.display().to_string())
                .field("outcome", "skipped")
                .field("reason", reason),
        );
        ItemReport {
            input: item.input,
            output: item.output,
            outcome: ItemOutcome::SkippedCancelled {
                reason: reason.to_string(),
            },
            audio_extracted: None,
        }
    }
}
