/*!
Scripted telemetry source

Yields a queue of samples and failures, then keeps repeating the last
entry. Counts every poll.
*/

use async_trait::async_trait;
use avd_converter::telemetry::{TelemetryError, TelemetrySource, TemperatureSample};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Step {
    Sample { cpu: f64, gpu: f64 },
    Failure(String),
}

#[derive(Clone)]
pub struct ScriptedTelemetry {
    steps: Arc<Mutex<VecDeque<Step>>>,
    last: Arc<Mutex<Step>>,
    polls: Arc<AtomicUsize>,
}

impl ScriptedTelemetry {
    /// Source that reports `cpu`/`gpu` forever unless more steps are queued
    pub fn steady(cpu: f64, gpu: f64) -> Self {
        Self {
            steps: Arc::new(Mutex::new(VecDeque::new())),
            last: Arc::new(Mutex::new(Step::Sample { cpu, gpu })),
            polls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Source that fails every poll unless more steps are queued
    pub fn failing(message: &str) -> Self {
        Self {
            steps: Arc::new(Mutex::new(VecDeque::new())),
            last: Arc::new(Mutex::new(Step::Failure(message.to_string()))),
            polls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn then_sample(self, cpu: f64, gpu: f64) -> Self {
        self.steps.lock().push_back(Step::Sample { cpu, gpu });
        self
    }

    pub fn then_fail(self, message: &str) -> Self {
        self.steps.lock().push_back(Step::Failure(message.to_string()));
        self
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        match self.steps.lock().pop_front() {
            Some(step) => {
                *self.last.lock() = step.clone();
                step
            }
            None => self.last.lock().clone(),
        }
    }
}

#[async_trait]
impl TelemetrySource for ScriptedTelemetry {
    async fn sample(&self) -> Result<TemperatureSample, TelemetryError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            Step::Sample { cpu, gpu } => Ok(TemperatureSample::now(cpu, gpu)),
            Step::Failure(stderr) => Err(TelemetryError::NonZeroExit {
                exit_code: Some(1),
                stderr,
            }),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_then_repeat_last() {
        let telemetry = ScriptedTelemetry::steady(40.0, 40.0)
            .then_fail("sensor busy")
            .then_sample(70.0, 60.0);

        assert!(telemetry.sample().await.is_err());
        assert_eq!(telemetry.sample().await.unwrap().cpu.celsius, 70.0);
        assert_eq!(telemetry.sample().await.unwrap().cpu.celsius, 70.0);
        assert_eq!(telemetry.polls(), 3);
    }

    #[tokio::test]
    async fn test_failing_source_keeps_failing() {
        let telemetry = ScriptedTelemetry::failing("powermetrics: must be run as root");
        for _ in 0..3 {
            assert!(telemetry.sample().await.is_err());
        }
    }
}
