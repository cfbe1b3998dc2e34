/*!
Recording log sink

Captures every `LogRecord` so tests can assert on the structured log
stream instead of parsing log files.
*/

use avd_converter::logging::{LogLevel, LogRecord, StructuredSink};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Records with exactly this message
    pub fn with_message(&self, message: &str) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.message == message)
            .cloned()
            .collect()
    }

    pub fn count(&self, message: &str) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.message == message)
            .count()
    }

    pub fn at_level(&self, level: LogLevel) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.level == level)
            .cloned()
            .collect()
    }

    /// Values of `field` across records with `message`, in emission order
    pub fn field_values(&self, message: &str, field: &str) -> Vec<Value> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.message == message)
            .filter_map(|r| r.get(field).cloned())
            .collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.records.lock().iter().map(|r| r.message.clone()).collect()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl StructuredSink for RecordingSink {
    fn emit(&self, record: LogRecord) {
        self.records.lock().push(record);
    }
}
