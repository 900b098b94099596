//! Log record model and its ingest wire shape

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Levels are matched case-insensitively onto the closed set.
///
/// Aliases from other logging libraries fold into their nearest level:
/// `verbose` and `silly` become TRACE, `information` and `http` become INFO,
/// `warning` becomes WARN, `err` becomes ERROR, `critical` becomes FATAL.
/// Anything unrecognised is logged as INFO.
impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "TRACE" | "VERBOSE" | "SILLY" => LogLevel::Trace,
            "DEBUG" => LogLevel::Debug,
            "INFO" | "INFORMATION" | "HTTP" => LogLevel::Info,
            "WARN" | "WARNING" => LogLevel::Warn,
            "ERROR" | "ERR" => LogLevel::Error,
            "FATAL" | "CRITICAL" => LogLevel::Fatal,
            _ => LogLevel::Info,
        }
    }
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => LogLevel::Trace,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

/// Attribute values stamped on every entry, snapshotted from configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DefaultAttributes {
    pub environment: String,
    pub app_name: String,
    pub service_name: String,
    pub host_name: String,
    pub segment: String,
}

impl Default for DefaultAttributes {
    fn default() -> Self {
        Self {
            environment: "unknown".to_string(),
            app_name: "Express App".to_string(),
            service_name: "express-app".to_string(),
            host_name: "unknown".to_string(),
            segment: "default".to_string(),
        }
    }
}

impl DefaultAttributes {
    fn as_attributes(&self) -> HashMap<String, Value> {
        HashMap::from([
            ("environment".to_string(), Value::from(self.environment.as_str())),
            ("appname".to_string(), Value::from(self.app_name.as_str())),
            ("service".to_string(), Value::from(self.service_name.as_str())),
            ("hostname".to_string(), Value::from(self.host_name.as_str())),
            ("segment".to_string(), Value::from(self.segment.as_str())),
        ])
    }
}

/// One record destined for the ingest endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub level: LogLevel,
    pub content: String,
    pub defaults: Arc<DefaultAttributes>,
    pub attributes: HashMap<String, Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, content: impl Into<String>, defaults: Arc<DefaultAttributes>) -> Self {
        let attributes = defaults.as_attributes();
        Self {
            timestamp: current_timestamp_millis(),
            level,
            content: content.into(),
            defaults,
            attributes,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Merge caller metadata over the default attributes. Caller keys win.
    pub fn with_metadata<I>(mut self, metadata: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.attributes.extend(metadata);
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[derive(Serialize)]
struct WireEntry<'a> {
    timestamp: u64,
    status: &'static str,
    loglevel: &'static str,
    environment: &'a str,
    appname: &'a str,
    service: &'a str,
    content: &'a str,
    severity: &'static str,
    segment: &'a str,
    hostname: &'a str,
    attributes: &'a HashMap<String, Value>,
}

impl Serialize for LogEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let level = self.level.as_str();
        WireEntry {
            timestamp: self.timestamp,
            status: level,
            loglevel: level,
            environment: &self.defaults.environment,
            appname: &self.defaults.app_name,
            service: &self.defaults.service_name,
            content: &self.content,
            severity: level,
            segment: &self.defaults.segment,
            hostname: &self.defaults.host_name,
            attributes: &self.attributes,
        }
        .serialize(serializer)
    }
}

/// Current wall clock time in milliseconds since the Unix epoch
pub fn current_timestamp_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}
