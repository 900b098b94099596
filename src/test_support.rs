//! Shared fixtures for unit tests

use crate::buffer::Batch;
use crate::config::{Config, ExportTarget};
use crate::entry::LogEntry;
use crate::errors::{Result, SinkError};
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Transport that records every delivered batch and fails on demand
#[derive(Debug, Default)]
pub struct RecordingTransport {
    delivered: Mutex<Vec<Vec<LogEntry>>>,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl RecordingTransport {
    pub fn failing(times: usize) -> Self {
        let transport = Self::default();
        transport.failures_left.store(times, Ordering::SeqCst);
        transport
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<Vec<LogEntry>> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn delivered_contents(&self) -> Vec<Vec<String>> {
        self.delivered()
            .iter()
            .map(|batch| batch.iter().map(|e| e.content.clone()).collect())
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, _target: &ExportTarget, batch: &Batch) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(SinkError::Rejected {
                status: 500,
                body: "simulated failure".to_string(),
            });
        }

        self.delivered
            .lock()
            .unwrap()
            .push(batch.entries().cloned().collect());
        Ok(())
    }
}

/// Transport that holds every send until permits are released
#[derive(Debug)]
pub struct GatedTransport {
    recorder: RecordingTransport,
    permits: Semaphore,
}

impl GatedTransport {
    pub fn closed() -> Self {
        Self {
            recorder: RecordingTransport::default(),
            permits: Semaphore::new(0),
        }
    }

    /// Let `sends` more exports through
    pub fn release(&self, sends: usize) {
        self.permits.add_permits(sends);
    }

    pub fn recorder(&self) -> &RecordingTransport {
        &self.recorder
    }
}

#[async_trait]
impl Transport for GatedTransport {
    async fn send(&self, target: &ExportTarget, batch: &Batch) -> Result<()> {
        self.permits
            .acquire()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?
            .forget();
        self.recorder.send(target, batch).await
    }
}

pub fn test_config(max_batch_size: usize) -> Config {
    let mut config = Config::default().with_target(ExportTarget::new("test-env", "test-token"));
    config.max_batch_size = max_batch_size;
    config.flush_interval = Duration::from_millis(100_000);
    config
}
