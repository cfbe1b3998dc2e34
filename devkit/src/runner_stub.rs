/*!
Scripted command runner

Stands in for `SystemCommandRunner` so pipelines run without ffmpeg or
powermetrics installed. Every invocation is recorded for assertions.
*/

use async_trait::async_trait;
use avd_converter::cancellation::CancellationSignal;
use avd_converter::execution::{CommandOutput, CommandRunner, ExecutionError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// One recorded invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub program: String,
    pub args: Vec<String>,
}

impl RecordedCall {
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Last argument, i.e. the output path of an ffmpeg call
    pub fn output(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }
}

struct FailureRule {
    needle: String,
    output: CommandOutput,
}

struct CancelHook {
    after_calls: usize,
    signal: CancellationSignal,
    reason: String,
}

/// Runner answering from rules, then a reply queue, then a default
#[derive(Clone)]
pub struct ScriptedRunner {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    replies: Arc<Mutex<VecDeque<CommandOutput>>>,
    failures: Arc<Mutex<Vec<FailureRule>>>,
    hooks: Arc<Mutex<Vec<CancelHook>>>,
    default_reply: CommandOutput,
    delay: Option<Duration>,
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRunner {
    /// Every call succeeds with empty output
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            replies: Arc::new(Mutex::new(VecDeque::new())),
            failures: Arc::new(Mutex::new(Vec::new())),
            hooks: Arc::new(Mutex::new(Vec::new())),
            default_reply: CommandOutput::ok(""),
            delay: None,
        }
    }

    /// Queue a reply for the next unmatched call
    pub fn reply_with(self, output: CommandOutput) -> Self {
        self.replies.lock().push_back(output);
        self
    }

    /// Fail every call with an argument containing `needle`
    pub fn fail_when_arg_contains(self, needle: &str, exit_code: i32, stderr: &str) -> Self {
        self.failures.lock().push(FailureRule {
            needle: needle.to_string(),
            output: CommandOutput::failed(exit_code, stderr),
        });
        self
    }

    /// Sleep this long inside every call, simulating a slow process
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Trigger `signal` once the `after_calls`-th call has finished
    pub fn cancel_after(
        self,
        after_calls: usize,
        signal: CancellationSignal,
        reason: impl Into<String>,
    ) -> Self {
        self.hooks.lock().push(CancelHook {
            after_calls,
            signal,
            reason: reason.into(),
        });
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn reply_for(&self, args: &[String]) -> CommandOutput {
        let failures = self.failures.lock();
        if let Some(rule) = failures
            .iter()
            .find(|rule| args.iter().any(|a| a.contains(&rule.needle)))
        {
            return rule.output.clone();
        }
        drop(failures);

        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone())
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, ExecutionError> {
        self.calls.lock().push(RecordedCall {
            program: program.to_string(),
            args: args.to_vec(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self.reply_for(args);

        let completed = self.call_count();
        for hook in self.hooks.lock().iter() {
            if hook.after_calls == completed {
                hook.signal.trigger(hook.reason.clone());
            }
        }

        Ok(reply)
    }
}
