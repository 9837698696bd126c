//! Injectable structured logging
//!
//! Each component (pool, consumer handler, admin) holds an
//! `Arc<dyn LogSink>` instead of writing to a process-wide logger. The
//! default [`TracingSink`] forwards events to `tracing`; tests install a
//! recording sink to assert on reported failures.

use std::fmt;
use std::sync::Arc;

/// Severity of a [`LogEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// A structured event reported by a component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub level: LogLevel,
    /// Operation that produced the event (e.g. "commit", "reset_group_offsets")
    pub operation: &'static str,
    pub message: String,
    /// Rendered error, if the event reports a failure
    pub error: Option<String>,
    /// Extra key/value context (topic, partition, group, ...)
    pub fields: Vec<(&'static str, String)>,
}

impl LogEvent {
    pub fn new(level: LogLevel, operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            level,
            operation,
            message: message.into(),
            error: None,
            fields: Vec::new(),
        }
    }

    pub fn error(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, operation, message)
    }

    pub fn warn(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, operation, message)
    }

    pub fn info(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, operation, message)
    }

    /// Attach the error that caused this event
    pub fn with_error(mut self, err: &dyn fmt::Display) -> Self {
        self.error = Some(err.to_string());
        self
    }

    /// Attach a key/value pair
    pub fn field(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        self.fields.push((key, value.to_string()));
        self
    }

    /// Look up a field value by key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    fn render_fields(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Destination for structured events
pub trait LogSink: Send + Sync {
    fn log(&self, event: LogEvent);
}

/// Forwards events to the `tracing` subscriber installed by the application
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, event: LogEvent) {
        let fields = event.render_fields();
        let error = event.error.as_deref().unwrap_or("");
        match event.level {
            LogLevel::Debug => tracing::debug!(
                operation = event.operation,
                error,
                fields = %fields,
                "{}",
                event.message
            ),
            LogLevel::Info => tracing::info!(
                operation = event.operation,
                error,
                fields = %fields,
                "{}",
                event.message
            ),
            LogLevel::Warn => tracing::warn!(
                operation = event.operation,
                error,
                fields = %fields,
                "{}",
                event.message
            ),
            LogLevel::Error => tracing::error!(
                operation = event.operation,
                error,
                fields = %fields,
                "{}",
                event.message
            ),
        }
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _event: LogEvent) {}
}

/// The sink components use when none is injected
pub fn default_sink() -> Arc<dyn LogSink> {
    Arc::new(TracingSink)
}
