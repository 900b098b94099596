//! Dynatrace Log Sink Library
//!
//! Buffers structured log records in memory and ships them in batches to the
//! Dynatrace log ingest API. Batches are flushed on a timer or as soon as a
//! full batch is buffered, and failed batches are retried ahead of newer logs.

pub mod access_log;
pub mod buffer;
pub mod config;
pub mod entry;
pub mod errors;
pub mod layer;
pub mod scheduler;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use access_log::{classify, log_access, AccessRecord};
pub use buffer::{Batch, BatchBuffer};
pub use config::{Config, ExportTarget};
pub use entry::{DefaultAttributes, LogEntry, LogLevel};
pub use errors::{Result, SinkError};
pub use layer::{init_tracing, SinkLayer};
pub use scheduler::{ExportScheduler, FlushOutcome, SchedulerState, SchedulerStats};
pub use transport::{ExportMetricsSnapshot, HttpTransport, Transport};
