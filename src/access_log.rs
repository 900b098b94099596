//! Access log lines for completed HTTP exchanges

use crate::entry::LogLevel;
use crate::scheduler::ExportScheduler;
use reqwest::StatusCode;
use std::fmt;
use std::time::{Duration, Instant};

/// Map a response status to a level: 5xx is ERROR, 4xx is WARN, anything else INFO.
///
/// Codes of 600 and above are INFO.
pub fn classify(status: u16) -> LogLevel {
    match status {
        500..=599 => LogLevel::Error,
        400..=499 => LogLevel::Warn,
        _ => LogLevel::Info,
    }
}

/// One completed request/response pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRecord {
    pub method: String,
    pub path: String,
    pub http_version: String,
    pub status: u16,
    pub status_text: String,
    pub duration: Duration,
}

impl AccessRecord {
    /// Build a record, taking the status text from the canonical reason phrase
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        http_version: impl Into<String>,
        status: u16,
        duration: Duration,
    ) -> Self {
        let status_text = StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or_default()
            .to_string();

        Self {
            method: method.into(),
            path: path.into(),
            http_version: http_version.into(),
            status,
            status_text,
            duration,
        }
    }

    /// Same as `new`, with the duration measured from `started`
    pub fn since(
        started: Instant,
        method: impl Into<String>,
        path: impl Into<String>,
        http_version: impl Into<String>,
        status: u16,
    ) -> Self {
        Self::new(method, path, http_version, status, started.elapsed())
    }

    pub fn with_status_text(mut self, status_text: impl Into<String>) -> Self {
        self.status_text = status_text.into();
        self
    }

    pub fn level(&self) -> LogLevel {
        classify(self.status)
    }
}

impl fmt::Display for AccessRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"{} {} HTTP/{}\" {} {} {}ms",
            self.method,
            self.path,
            self.http_version,
            self.status,
            self.status_text,
            self.duration.as_millis()
        )
    }
}

/// Log a completed exchange at the level its status code maps to
pub fn log_access(scheduler: &ExportScheduler, record: &AccessRecord) {
    scheduler.log(record.level(), record.to_string(), None);
}
