//! Error types for the log sink

use std::fmt;

pub type Result<T> = std::result::Result<T, SinkError>;

#[derive(Debug)]
pub enum SinkError {
    /// HTTP request failed before a response was received
    Http(reqwest::Error),

    /// JSON serialization failed
    Json(serde_json::Error),

    /// Configuration error
    Config(String),

    /// Ingest endpoint answered with a non-success status
    Rejected { status: u16, body: String },

    /// Transport error (timeouts and similar)
    Transport(String),

    /// Operation needs a tokio runtime or a live scheduler
    Runtime(String),

    /// Generic error with message
    Other(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Http(err) => write!(f, "HTTP error: {}", err),
            SinkError::Json(err) => write!(f, "JSON error: {}", err),
            SinkError::Config(msg) => write!(f, "Configuration error: {}", msg),
            SinkError::Rejected { status, body } => {
                write!(f, "Ingest endpoint rejected batch with status {}: {}", status, body)
            }
            SinkError::Transport(msg) => write!(f, "Transport error: {}", msg),
            SinkError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
            SinkError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::Http(err) => Some(err),
            SinkError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        SinkError::Http(err)
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Json(err)
    }
}
