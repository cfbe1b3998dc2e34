//! Structured sink trait and its production adapters.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Severity of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Log channel a `TracingSink` writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Conversion, monitoring and executor records
    Main,
    /// File inventory records written by the `info` command
    Info,
}

/// One structured log record: a message plus ordered key/value fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub fields: Vec<(String, Value)>,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn debug(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Debug, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }

    /// Append a field. Later fields with the same key do not replace earlier ones.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    /// First value recorded under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Fields rendered as a single JSON object.
    pub fn fields_json(&self) -> Value {
        let map: Map<String, Value> = self.fields.iter().cloned().collect();
        Value::Object(map)
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if !self.fields.is_empty() {
            write!(f, " {}", self.fields_json())?;
        }
        Ok(())
    }
}

/// Destination for structured records.
///
/// Implementations must be `Send + Sync`: the monitor emits from its own task
/// while the processor emits from the foreground.
pub trait StructuredSink: Send + Sync {
    fn emit(&self, record: LogRecord);
}

/// Sink backed by the `tracing` subscriber installed in `logging::init`.
#[derive(Debug, Clone, Copy)]
pub struct TracingSink {
    channel: Channel,
}

impl TracingSink {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    pub fn main() -> Self {
        Self::new(Channel::Main)
    }

    pub fn info() -> Self {
        Self::new(Channel::Info)
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }
}

// `tracing` callsites need a constant target and level, so each
// combination gets its own macro expansion.
macro_rules! forward {
    ($target:expr, $level:expr, $record:expr) => {{
        let fields = $record.fields_json();
        match $level {
            LogLevel::Debug => tracing::debug!(target: $target, fields = %fields, "{}", $record.message),
            LogLevel::Info => tracing::info!(target: $target, fields = %fields, "{}", $record.message),
            LogLevel::Warn => tracing::warn!(target: $target, fields = %fields, "{}", $record.message),
            LogLevel::Error => tracing::error!(target: $target, fields = %fields, "{}", $record.message),
        }
    }};
}

impl StructuredSink for TracingSink {
    fn emit(&self, record: LogRecord) {
        match self.channel {
            Channel::Main => forward!("avd::main", record.level, record),
            Channel::Info => forward!("avd::info", record.level, record),
        }
    }
}

/// Sink that drops every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl StructuredSink for NoopSink {
    #[inline]
    fn emit(&self, _record: LogRecord) {}
}
