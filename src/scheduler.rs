//! Batch export scheduler: size and timer triggered flushes with head requeue on failure

use crate::buffer::{Batch, BatchBuffer};
use crate::config::Config;
use crate::entry::{DefaultAttributes, LogEntry, LogLevel};
use crate::errors::{Result, SinkError};
use crate::transport::{ExportMetrics, ExportMetricsSnapshot, HttpTransport, Transport};

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Lifecycle of a scheduler. There is no way back from `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Closed,
}

/// What a single flush did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered
    Empty,
    /// Export target missing, the batch was dropped
    Discarded(usize),
    /// The transport accepted the batch
    Delivered(usize),
    /// The transport failed, the batch went back to the buffer head
    Requeued { requeued: usize, dead_lettered: usize },
}

/// Scheduler statistics
#[derive(Debug, Clone)]
pub struct SchedulerStats {
    pub state: SchedulerState,
    pub buffered: usize,
    pub dropped: u64,
    pub export: ExportMetricsSnapshot,
}

struct Lifecycle {
    state: SchedulerState,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    config: Config,
    defaults: Arc<DefaultAttributes>,
    buffer: Mutex<BatchBuffer>,
    transport: Arc<dyn Transport>,
    /// Held for the whole of an export, so at most one batch is in flight
    export_gate: Arc<tokio::sync::Mutex<()>>,
    flush_queued: AtomicBool,
    metrics: ExportMetrics,
    lifecycle: Mutex<Lifecycle>,
    shutdown: watch::Sender<bool>,
}

/// Owns the buffer, the flush timer and the transport for one ingest target.
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct ExportScheduler {
    inner: Arc<Inner>,
}

impl ExportScheduler {
    /// Create a scheduler in the `Idle` state
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate().map_err(SinkError::Config)?;

        if config.target.is_none() {
            warn!("Log export target not configured, buffered logs will be discarded on flush");
        }

        let buffer = BatchBuffer::new()
            .with_max_size(config.max_buffer_size)
            .with_max_attempts(config.max_export_attempts);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                defaults: Arc::new(config.defaults.clone()),
                config,
                buffer: Mutex::new(buffer),
                transport,
                export_gate: Arc::new(tokio::sync::Mutex::new(())),
                flush_queued: AtomicBool::new(false),
                metrics: ExportMetrics::new(),
                lifecycle: Mutex::new(Lifecycle {
                    state: SchedulerState::Idle,
                    timer: None,
                }),
                shutdown,
            }),
        })
    }

    /// Create a scheduler that exports over HTTPS
    pub fn from_config(config: Config) -> Result<Self> {
        let transport = HttpTransport::new(config.http_timeout)?;
        Self::new(config, Arc::new(transport))
    }

    /// Record a log line. Never blocks on network I/O and never fails.
    pub fn log(
        &self,
        level: impl Into<LogLevel>,
        message: impl Into<String>,
        metadata: Option<HashMap<String, Value>>,
    ) {
        let mut entry = LogEntry::new(level.into(), message, Arc::clone(&self.inner.defaults));
        if let Some(metadata) = metadata {
            entry = entry.with_metadata(metadata);
        }
        self.append(entry);
    }

    /// Buffer a prebuilt entry, flushing right away once a full batch is buffered
    pub fn append(&self, entry: LogEntry) {
        let len = self.inner.lock_buffer().append(entry);
        if len >= self.inner.config.max_batch_size {
            self.dispatch_flush(true);
        }
    }

    /// Flush one batch, waiting for any export already in flight
    pub async fn flush(&self) -> FlushOutcome {
        self.inner.flush().await
    }

    /// Flush until the buffer is empty or a delivery fails. Returns what is left.
    pub async fn drain(&self) -> usize {
        loop {
            match self.flush().await {
                FlushOutcome::Delivered(_) | FlushOutcome::Discarded(_) => continue,
                FlushOutcome::Empty | FlushOutcome::Requeued { .. } => break,
            }
        }
        self.buffered()
    }

    /// Start the recurring flush timer
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<()> {
        let runtime = Handle::try_current()
            .map_err(|e| SinkError::Runtime(format!("flush timer needs a tokio runtime: {}", e)))?;

        let mut lifecycle = self.inner.lock_lifecycle();
        match lifecycle.state {
            SchedulerState::Running => return Ok(()),
            SchedulerState::Closed => {
                return Err(SinkError::Runtime("scheduler is closed".to_string()));
            }
            SchedulerState::Idle => {}
        }

        let period = self.inner.config.flush_interval;
        let mut shutdown = self.inner.shutdown.subscribe();
        let weak = Arc::downgrade(&self.inner);

        let timer = runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        inner.flush().await;
                    }
                }
            }

            debug!("Flush timer stopped");
        });

        lifecycle.state = SchedulerState::Running;
        lifecycle.timer = Some(timer);
        info!("Log export scheduler started, flushing every {:?}", period);
        Ok(())
    }

    /// Stop the timer and launch one last flush.
    ///
    /// The returned handle may be awaited for the final outcome or dropped.
    /// An export already in flight is left to finish on its own.
    #[instrument(skip(self))]
    pub fn close(&self) -> Option<JoinHandle<FlushOutcome>> {
        {
            let mut lifecycle = self.inner.lock_lifecycle();
            if lifecycle.state == SchedulerState::Closed {
                return None;
            }
            lifecycle.state = SchedulerState::Closed;
            self.inner.shutdown.send_replace(true);
            // the timer exits at its next wakeup, finishing any flush it is running
            lifecycle.timer.take();
        }

        info!("Closing log export scheduler with {} buffered entries", self.buffered());
        self.dispatch_flush(false)
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.lock_lifecycle().state
    }

    pub fn buffered(&self) -> usize {
        self.inner.lock_buffer().len()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn stats(&self) -> SchedulerStats {
        let (buffered, dropped) = {
            let buffer = self.inner.lock_buffer();
            (buffer.len(), buffer.dropped())
        };

        SchedulerStats {
            state: self.state(),
            buffered,
            dropped,
            export: self.inner.metrics.snapshot(),
        }
    }

    /// Extract synchronously when no export is in flight, otherwise queue a
    /// flush behind the current one. `coalesce` skips queueing when a flush is
    /// already waiting.
    fn dispatch_flush(&self, coalesce: bool) -> Option<JoinHandle<FlushOutcome>> {
        let Ok(runtime) = Handle::try_current() else {
            debug!("No tokio runtime available, leaving entries for a later flush");
            return None;
        };

        match Arc::clone(&self.inner.export_gate).try_lock_owned() {
            Ok(gate) => {
                let batch = match self.inner.take_batch() {
                    Ok(batch) => batch,
                    Err(outcome) => return Some(runtime.spawn(async move { outcome })),
                };
                let inner = Arc::clone(&self.inner);
                Some(runtime.spawn(async move {
                    let _gate = gate;
                    inner.deliver(batch).await
                }))
            }
            Err(_) => {
                if coalesce && self.inner.flush_queued.swap(true, Ordering::AcqRel) {
                    return None;
                }
                let inner = Arc::clone(&self.inner);
                Some(runtime.spawn(async move { inner.flush().await }))
            }
        }
    }
}

impl Inner {
    fn lock_buffer(&self) -> MutexGuard<'_, BatchBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn flush(&self) -> FlushOutcome {
        let _gate = self.export_gate.lock().await;
        self.flush_queued.store(false, Ordering::Release);

        match self.take_batch() {
            Ok(batch) => self.deliver(batch).await,
            Err(outcome) => outcome,
        }
    }

    /// Pull the next batch, or settle the flush without one
    fn take_batch(&self) -> std::result::Result<Batch, FlushOutcome> {
        let batch = {
            let mut buffer = self.lock_buffer();
            if buffer.is_empty() {
                return Err(FlushOutcome::Empty);
            }
            buffer.extract_batch(self.config.max_batch_size)
        };

        if self.config.target.is_none() {
            return Err(self.discard(batch));
        }

        Ok(batch)
    }

    fn discard(&self, batch: Batch) -> FlushOutcome {
        warn!(
            "Log export target not configured, discarding batch of {} entries",
            batch.len()
        );
        self.metrics.record_discard(batch.len());
        FlushOutcome::Discarded(batch.len())
    }

    async fn deliver(&self, batch: Batch) -> FlushOutcome {
        let Some(target) = self.config.target.as_ref() else {
            return self.discard(batch);
        };

        let count = batch.len();
        let started = std::time::Instant::now();

        match self.transport.send(target, &batch).await {
            Ok(()) => {
                self.metrics.record_success(count, started.elapsed());
                info!("Batch {} of {} logs exported successfully", batch.batch_id, count);
                FlushOutcome::Delivered(count)
            }
            Err(e) => {
                self.metrics.record_failure(started.elapsed());
                warn!("Failed to export log batch {}: {}", batch.batch_id, e);

                let dead_letters = self.lock_buffer().requeue_front(batch);
                if !dead_letters.is_empty() {
                    error!(
                        "Dropping {} log entries after {} failed export attempts",
                        dead_letters.len(),
                        self.config.max_export_attempts.unwrap_or_default()
                    );
                }

                FlushOutcome::Requeued {
                    requeued: count - dead_letters.len(),
                    dead_lettered: dead_letters.len(),
                }
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let remaining = self.lock_buffer().len();
        if remaining > 0 {
            warn!("Log export scheduler dropped with {} unexported entries", remaining);
        }
    }
}
