//! Background temperature monitor
//!
//! Polls a `TelemetrySource` on a fixed interval and triggers the run's
//! `CancellationSignal` the first time a reading strictly exceeds its limit.
//! Telemetry failures are logged and never stop the loop. The loop ends on
//! overheat, on an external stop request, or when it finds the signal
//! already cancelled.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::cancellation::{CancellationSignal, SignalState};
use crate::logging::{LogRecord, StructuredSink};
use crate::telemetry::{SensorChannel, TelemetrySource, TemperatureSample};

/// Upper bounds per channel, fixed for one batch run.
///
/// A bound of `0.0` disables that channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub max_cpu: f64,
    pub max_gpu: f64,
}

impl ThresholdConfig {
    pub fn new(max_cpu: f64, max_gpu: f64) -> Self {
        Self { max_cpu, max_gpu }
    }

    /// Active limit for `channel`, `None` when disabled
    pub fn limit(&self, channel: SensorChannel) -> Option<f64> {
        let bound = match channel {
            SensorChannel::Cpu => self.max_cpu,
            SensorChannel::Gpu => self.max_gpu,
        };
        (bound > 0.0).then_some(bound)
    }

    /// Cancellation reason when any reading strictly exceeds its limit
    pub fn check(&self, sample: &TemperatureSample) -> Option<String> {
        let violations: Vec<String> = [&sample.cpu, &sample.gpu]
            .into_iter()
            .filter_map(|reading| {
                let limit = self.limit(reading.channel)?;
                (reading.celsius > limit).then(|| {
                    format!(
                        "{} limit exceeded: {} > {}",
                        reading.channel,
                        format_celsius(reading.celsius),
                        format_celsius(limit)
                    )
                })
            })
            .collect();

        if violations.is_empty() {
            None
        } else {
            Some(violations.join("; "))
        }
    }
}

/// One decimal when that is exact, full precision otherwise
fn format_celsius(value: f64) -> String {
    let short = format!("{:.1}", value);
    if short.parse::<f64>().ok() == Some(value) {
        short
    } else {
        value.to_string()
    }
}

/// Why the monitor loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorExit {
    /// This monitor detected an overheat and triggered the signal
    Overheat(String),
    /// The stop condition was raised
    Stopped,
    /// The signal was already cancelled before the next poll
    AlreadyCancelled(String),
    /// The monitor task panicked or was aborted
    Aborted,
}

pub struct TemperatureMonitor {
    interval: Duration,
    thresholds: ThresholdConfig,
    source: Arc<dyn TelemetrySource>,
    signal: CancellationSignal,
    sink: Arc<dyn StructuredSink>,
}

impl TemperatureMonitor {
    pub fn new(
        interval: Duration,
        thresholds: ThresholdConfig,
        source: Arc<dyn TelemetrySource>,
        signal: CancellationSignal,
        sink: Arc<dyn StructuredSink>,
    ) -> Self {
        Self {
            // tokio intervals panic on a zero period
            interval: interval.max(Duration::from_millis(1)),
            thresholds,
            source,
            signal,
            sink,
        }
    }

    /// Run the loop on its own task
    pub fn spawn(self) -> MonitorHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(stop_rx));
        MonitorHandle { stop_tx, task }
    }

    /// Poll until overheat, stop request, or an already-cancelled signal.
    ///
    /// The first poll happens one interval after start. A stop request also
    /// interrupts a telemetry call that is still in flight.
    pub async fn run(self, mut stop: watch::Receiver<bool>) -> MonitorExit {
        self.sink.emit(
            LogRecord::debug("Temperature monitor started")
                .field("source", self.source.name())
                .field("interval_ms", self.interval.as_millis() as u64)
                .field("max_cpu", self.thresholds.max_cpu)
                .field("max_gpu", self.thresholds.max_gpu),
        );

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                biased;
                _ = wait_for_stop(&mut stop) => break MonitorExit::Stopped,
                _ = ticker.tick() => {}
            }

            if let SignalState::Cancelled(reason) = self.signal.observe() {
                break MonitorExit::AlreadyCancelled(reason);
            }

            let finished = tokio::select! {
                biased;
                _ = wait_for_stop(&mut stop) => break MonitorExit::Stopped,
                finished = self.poll_once() => finished,
            };

            if let Some(exit) = finished {
                break exit;
            }
        };

        self.sink.emit(
            LogRecord::debug("Temperature monitor stopped").field("exit", format!("{:?}", exit)),
        );
        exit
    }

    /// One telemetry call and comparison.
    ///
    /// Returns `Overheat` when this poll performed the cancellation, or
    /// `AlreadyCancelled` when another writer won the signal first.
    pub async fn poll_once(&self) -> Option<MonitorExit> {
        let sample = match self.source.sample().await {
            Ok(sample) => sample,
            Err(e) => {
                self.sink
                    .emit(LogRecord::warn("Failed to get temperatures").field("error", e.to_string()));
                return None;
            }
        };

        self.sink.emit(
            LogRecord::info("Temperature check")
                .field("cpu_temp", sample.cpu.celsius)
                .field("gpu_temp", sample.gpu.celsius),
        );

        let reason = self.thresholds.check(&sample)?;

        if !self.signal.trigger(reason.clone()) {
            let existing = self.signal.observe().reason().unwrap_or_default().to_string();
            self.sink.emit(
                LogRecord::debug("Temperature limit exceeded after cancellation")
                    .field("reason", reason)
                    .field("existing_reason", existing.clone()),
            );
            return Some(MonitorExit::AlreadyCancelled(existing));
        }

        self.sink.emit(
            LogRecord::error("Temperature limit exceeded")
                .field("cpu_temp", sample.cpu.celsius)
                .field("gpu_temp", sample.gpu.celsius)
                .field("max_cpu", self.thresholds.max_cpu)
                .field("max_gpu", self.thresholds.max_gpu)
                .field("reason", reason.clone()),
        );
        Some(MonitorExit::Overheat(reason))
    }
}

/// Resolves once the stop flag is set or the sender is gone
async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Owner of a spawned monitor task
pub struct MonitorHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<MonitorExit>,
}

impl MonitorHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Raise the stop condition and wait for the loop to exit
    pub async fn shutdown(self) -> MonitorExit {
        // The task may already be gone after an overheat
        let _ = self.stop_tx.send(true);
        self.task.await.unwrap_or(MonitorExit::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogLevel, NoopSink};
    use crate::telemetry::TelemetryError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Pops scripted results, then keeps answering with `fallback`
    struct Script {
        queue: Mutex<VecDeque<Option<(f64, f64)>>>,
        fallback: Option<(f64, f64)>,
        calls: AtomicUsize,
    }

    impl Script {
        fn new(items: Vec<Option<(f64, f64)>>, fallback: Option<(f64, f64)>) -> Arc<Self> {
            Arc::new(Self {
                queue: Mutex::new(items.into()),
                fallback,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TelemetrySource for Script {
        async fn sample(&self) -> Result<TemperatureSample, TelemetryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.queue.lock().unwrap().pop_front().unwrap_or(self.fallback);
            match next {
                Some((cpu, gpu)) => Ok(TemperatureSample::now(cpu, gpu)),
                None => Err(TelemetryError::MissingChannel(SensorChannel::Cpu)),
            }
        }

        fn name(&self) -> &str {
            "script"
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<LogRecord>>);

    impl StructuredSink for Collect {
        fn emit(&self, record: LogRecord) {
            self.0.lock().unwrap().push(record);
        }
    }

    fn monitor(
        source: Arc<dyn TelemetrySource>,
        signal: &CancellationSignal,
        sink: Arc<dyn StructuredSink>,
    ) -> TemperatureMonitor {
        TemperatureMonitor::new(
            Duration::from_secs(10),
            ThresholdConfig::new(80.0, 85.0),
            source,
            signal.clone(),
            sink,
        )
    }

    #[test]
    fn test_check_reports_exceeding_channel() {
        let thresholds = ThresholdConfig::new(80.0, 85.0);

        assert_eq!(thresholds.check(&TemperatureSample::now(79.9, 85.0)), None);
        assert_eq!(
            thresholds.check(&TemperatureSample::now(92.3, 40.0)).as_deref(),
            Some("CPU limit exceeded: 92.3 > 80.0")
        );
        assert_eq!(
            thresholds.check(&TemperatureSample::now(50.0, 85.25)).as_deref(),
            Some("GPU limit exceeded: 85.25 > 85.0")
        );
    }

    #[test]
    fn test_check_equal_is_not_exceeded() {
        let thresholds = ThresholdConfig::new(80.0, 85.0);
        assert_eq!(thresholds.check(&TemperatureSample::now(80.0, 85.0)), None);
    }

    #[test]
    fn test_check_both_channels() {
        let thresholds = ThresholdConfig::new(80.0, 85.0);
        let reason = thresholds.check(&TemperatureSample::now(90.0, 95.5)).unwrap();
        assert_eq!(
            reason,
            "CPU limit exceeded: 90.0 > 80.0; GPU limit exceeded: 95.5 > 85.0"
        );
    }

    #[test]
    fn test_zero_threshold_disables_channel() {
        let thresholds = ThresholdConfig::new(0.0, 85.0);
        assert_eq!(thresholds.limit(SensorChannel::Cpu), None);
        assert_eq!(thresholds.check(&TemperatureSample::now(120.0, 40.0)), None);
        assert!(thresholds.check(&TemperatureSample::now(120.0, 90.0)).is_some());
    }

    #[tokio::test]
    async fn test_poll_once_logs_and_triggers() {
        let signal = CancellationSignal::new();
        let sink = Arc::new(Collect::default());
        let source = Script::new(vec![Some((95.0, 50.0))], None);
        let monitor = monitor(source, &signal, sink.clone());

        let exit = monitor.poll_once().await;
        assert_eq!(
            exit,
            Some(MonitorExit::Overheat("CPU limit exceeded: 95.0 > 80.0".into()))
        );
        assert_eq!(signal.observe().reason(), Some("CPU limit exceeded: 95.0 > 80.0"));

        let records = sink.0.lock().unwrap();
        assert_eq!(records[0].message, "Temperature check");
        assert_eq!(records[1].message, "Temperature limit exceeded");
        assert_eq!(records[1].level, LogLevel::Error);
        assert_eq!(records[1].get("max_cpu"), Some(&serde_json::Value::from(80.0)));
    }

    #[tokio::test]
    async fn test_poll_once_losing_the_race_is_not_an_overheat() {
        let signal = CancellationSignal::new();
        let sink = Arc::new(Collect::default());
        let monitor = monitor(Script::new(vec![Some((95.0, 50.0))], None), &signal, sink.clone());

        // Another writer cancels between the tick check and the trigger
        signal.trigger("external shutdown");

        let exit = monitor.poll_once().await;
        assert_eq!(exit, Some(MonitorExit::AlreadyCancelled("external shutdown".into())));
        assert_eq!(signal.observe().reason(), Some("external shutdown"));

        let records = sink.0.lock().unwrap();
        assert!(records.iter().all(|r| r.message != "Temperature limit exceeded"));
        assert_eq!(
            records.last().unwrap().message,
            "Temperature limit exceeded after cancellation"
        );
    }

    #[tokio::test]
    async fn test_poll_once_failure_is_a_warning() {
        let signal = CancellationSignal::new();
        let sink = Arc::new(Collect::default());
        let monitor = monitor(Script::new(vec![], None), &signal, sink.clone());

        assert_eq!(monitor.poll_once().await, None);
        assert!(!signal.is_cancelled());

        let records = sink.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, LogLevel::Warn);
        assert_eq!(records[0].message, "Failed to get temperatures");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_overheat_after_failures() {
        let signal = CancellationSignal::new();
        let source = Script::new(
            vec![None, Some((60.0, 50.0)), None, Some((81.5, 50.0))],
            Some((99.0, 99.0)),
        );
        let monitor = monitor(source.clone(), &signal, Arc::new(NoopSink));
        let (_stop_tx, stop_rx) = watch::channel(false);

        let exit = monitor.run(stop_rx).await;

        assert_eq!(exit, MonitorExit::Overheat("CPU limit exceeded: 81.5 > 80.0".into()));
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
        assert_eq!(signal.observe().reason(), Some("CPU limit exceeded: 81.5 > 80.0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_never_cancel() {
        let signal = CancellationSignal::new();
        let source = Script::new(vec![], None);
        let handle = monitor(source.clone(), &signal, Arc::new(NoopSink)).spawn();

        tokio::time::sleep(Duration::from_secs(55)).await;
        assert!(!handle.is_finished());
        assert!(!signal.is_cancelled());
        assert_eq!(source.calls.load(Ordering::SeqCst), 5);

        assert_eq!(handle.shutdown().await, MonitorExit::Stopped);
        assert!(!signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_first_poll() {
        let signal = CancellationSignal::new();
        let source = Script::new(vec![], Some((99.0, 99.0)));
        let handle = monitor(source.clone(), &signal, Arc::new(NoopSink)).spawn();

        assert_eq!(handle.shutdown().await, MonitorExit::Stopped);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert!(!signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_signal_ends_loop() {
        let signal = CancellationSignal::new();
        signal.trigger("external shutdown");
        let source = Script::new(vec![], Some((99.0, 99.0)));
        let (_stop_tx, stop_rx) = watch::channel(false);

        let exit = monitor(source.clone(), &signal, Arc::new(NoopSink)).run(stop_rx).await;

        assert_eq!(exit, MonitorExit::AlreadyCancelled("external shutdown".into()));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert_eq!(signal.observe().reason(), Some("external shutdown"));
    }

    #[test]
    fn test_format_celsius() {
        assert_eq!(format_celsius(80.0), "80.0");
        assert_eq!(format_celsius(92.3), "92.3");
        assert_eq!(format_celsius(61.52), "61.52");
    }
}
