//! HTTP transport for delivering batches to the log ingest endpoint

use crate::buffer::Batch;
use crate::config::ExportTarget;
use crate::errors::{Result, SinkError};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Delivers one batch per call. Any `Err` makes the scheduler requeue the batch.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, target: &ExportTarget, batch: &Batch) -> Result<()>;
}

/// reqwest-backed transport for the `/api/v2/logs/ingest` API
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a new HTTP transport. Certificate verification stays enabled.
    pub fn new(http_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(http_timeout)
            .user_agent(format!("dynatrace_log_sink/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(SinkError::Http)?;

        Ok(Self {
            client,
            timeout: http_timeout,
        })
    }

    /// Handle the HTTP response from the ingest endpoint
    async fn handle_response(&self, response: Response, batch_id: &str) -> Result<()> {
        let status = response.status();

        if status.is_success() {
            debug!("Batch {} accepted by ingest endpoint ({})", batch_id, status);
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        Err(SinkError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, target: &ExportTarget, batch: &Batch) -> Result<()> {
        let url = target.ingest_url();

        debug!(
            "Sending batch {} with {} entries to {}",
            batch.batch_id,
            batch.len(),
            url
        );

        let body = serde_json::to_vec(batch)?;

        let request = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Api-Token {}", target.api_token))
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        let response = timeout(self.timeout, request.send())
            .await
            .map_err(|_| SinkError::Transport("Request timeout".to_string()))?
            .map_err(SinkError::Http)?;

        self.handle_response(response, &batch.batch_id).await
    }
}

/// Export counters shared by the scheduler and its flush tasks
#[derive(Debug, Default)]
pub struct ExportMetrics {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    exported_entries: AtomicU64,
    discarded_entries: AtomicU64,
    total_duration_ms: AtomicU64,
}

impl ExportMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_success(&self, entries: usize, duration: Duration) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.exported_entries
            .fetch_add(entries as u64, Ordering::Relaxed);
        self.add_duration(duration);
    }

    pub(crate) fn record_failure(&self, duration: Duration) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.add_duration(duration);
    }

    pub(crate) fn record_discard(&self, entries: usize) {
        self.discarded_entries
            .fetch_add(entries as u64, Ordering::Relaxed);
    }

    fn add_duration(&self, duration: Duration) {
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ExportMetricsSnapshot {
        let attempts = self.attempts.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);
        let total_duration_ms = self.total_duration_ms.load(Ordering::Relaxed);

        let success_rate = if attempts > 0 {
            (successes as f64 / attempts as f64) * 100.0
        } else {
            0.0
        };

        ExportMetricsSnapshot {
            attempts,
            successes,
            failures: self.failures.load(Ordering::Relaxed),
            success_rate,
            exported_entries: self.exported_entries.load(Ordering::Relaxed),
            discarded_entries: self.discarded_entries.load(Ordering::Relaxed),
            avg_duration_ms: total_duration_ms.checked_div(attempts).unwrap_or(0),
        }
    }
}

/// Snapshot of export metrics
#[derive(Debug, Clone, PartialEq)]
pub struct ExportMetricsSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub exported_entries: u64,
    pub discarded_entries: u64,
    pub avg_duration_ms: u64,
}
