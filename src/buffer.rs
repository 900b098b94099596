//! In-memory batching buffer for pending log entries

use crate::entry::LogEntry;
use serde::{Serialize, Serializer};
use std::collections::VecDeque;
use tracing::{debug, warn};
use uuid::Uuid;

/// A buffered entry plus the number of failed exports it has been part of
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub entry: LogEntry,
    pub failed_attempts: u32,
}

/// Oldest-first slice of the buffer handed to the transport in one call.
///
/// Serializes as the JSON array the ingest endpoint expects.
#[derive(Debug, Clone)]
pub struct Batch {
    pub batch_id: String,
    pending: Vec<PendingEntry>,
}

impl Batch {
    fn new(pending: Vec<PendingEntry>) -> Self {
        Self {
            batch_id: Uuid::new_v4().to_string(),
            pending,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.pending.iter().map(|p| &p.entry)
    }

    pub fn pending(&self) -> &[PendingEntry] {
        &self.pending
    }
}

impl Serialize for Batch {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries())
    }
}

/// FIFO queue of entries awaiting export. Failed batches go back to the head.
#[derive(Debug)]
pub struct BatchBuffer {
    entries: VecDeque<PendingEntry>,
    max_size: Option<usize>,
    max_attempts: Option<u32>,
    last_timestamp: u64,
    dropped: u64,
}

impl BatchBuffer {
    /// Create an unbounded buffer that retries forever
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            max_size: None,
            max_attempts: None,
            last_timestamp: 0,
            dropped: 0,
        }
    }

    /// Drop the oldest entry on append once `max_size` entries are buffered
    pub fn with_max_size(mut self, max_size: Option<usize>) -> Self {
        self.max_size = max_size;
        self
    }

    /// Dead-letter entries once they have failed `max_attempts` exports
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Append at the tail and return the new length.
    ///
    /// Timestamps are clamped so they never decrease along the buffer.
    pub fn append(&mut self, mut entry: LogEntry) -> usize {
        if entry.timestamp < self.last_timestamp {
            entry.timestamp = self.last_timestamp;
        } else {
            self.last_timestamp = entry.timestamp;
        }

        if let Some(max_size) = self.max_size {
            if self.entries.len() >= max_size {
                self.entries.pop_front();
                self.dropped += 1;
                warn!("Log buffer overflow, dropping oldest entry");
            }
        }

        self.entries.push_back(PendingEntry {
            entry,
            failed_attempts: 0,
        });
        self.entries.len()
    }

    /// Remove up to `max_batch_size` oldest entries, in order
    pub fn extract_batch(&mut self, max_batch_size: usize) -> Batch {
        let count = std::cmp::min(max_batch_size, self.entries.len());
        let pending: Vec<PendingEntry> = self.entries.drain(..count).collect();

        if count > 0 {
            debug!("Extracted batch of {} entries, {} remain", count, self.entries.len());
        }

        Batch::new(pending)
    }

    /// Put a failed batch back at the head, ahead of anything appended since.
    ///
    /// Returns the entries that reached the attempt cap and were not requeued.
    pub fn requeue_front(&mut self, batch: Batch) -> Vec<LogEntry> {
        let mut dead_letters = Vec::new();

        for mut pending in batch.pending.into_iter().rev() {
            pending.failed_attempts += 1;
            if self
                .max_attempts
                .is_some_and(|max| pending.failed_attempts >= max)
            {
                dead_letters.push(pending.entry);
            } else {
                self.entries.push_front(pending);
            }
        }

        dead_letters.reverse();
        self.dropped += dead_letters.len() as u64;
        dead_letters
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries lost to overflow or the attempt cap since creation
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        debug!("Cleared all buffered entries");
    }
}

impl Default for BatchBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{DefaultAttributes, LogLevel};
    use std::sync::Arc;

    fn entry(message: &str) -> LogEntry {
        LogEntry::new(LogLevel::Info, message, Arc::new(DefaultAttributes::default()))
    }

    fn contents(batch: &Batch) -> Vec<String> {
        batch.entries().map(|e| e.content.clone()).collect()
    }

    #[test]
    fn test_fifo_extraction() {
        let mut buffer = BatchBuffer::new();
        for message in ["a", "b", "c"] {
            buffer.append(entry(message));
        }

        let batch = buffer.extract_batch(10);

        assert_eq!(contents(&batch), vec!["a", "b", "c"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_extract_is_bounded_by_batch_size() {
        let mut buffer = BatchBuffer::new();
        for i in 0..5 {
            buffer.append(entry(&format!("m{}", i)));
        }

        let batch = buffer.extract_batch(2);

        assert_eq!(contents(&batch), vec!["m0", "m1"]);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_extract_from_empty_buffer() {
        let mut buffer = BatchBuffer::new();
        let batch = buffer.extract_batch(50);
        assert!(batch.is_empty());
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn test_requeue_precedes_new_appends() {
        let mut buffer = BatchBuffer::new();
        for message in ["a", "b", "c"] {
            buffer.append(entry(message));
        }

        let batch = buffer.extract_batch(3);
        buffer.append(entry("d"));
        let dead_letters = buffer.requeue_front(batch);

        assert!(dead_letters.is_empty());
        let retry = buffer.extract_batch(10);
        assert_eq!(contents(&retry), vec!["a", "b", "c", "d"]);
        assert_eq!(retry.pending()[0].failed_attempts, 1);
        assert_eq!(retry.pending()[3].failed_attempts, 0);
    }

    #[test]
    fn test_attempt_cap_dead_letters_entries() {
        let mut buffer = BatchBuffer::new().with_max_attempts(Some(2));
        buffer.append(entry("poison"));

        let batch = buffer.extract_batch(10);
        assert!(buffer.requeue_front(batch).is_empty());
        assert_eq!(buffer.len(), 1);

        let batch = buffer.extract_batch(10);
        let dead_letters = buffer.requeue_front(batch);

        assert_eq!(dead_letters.len(), 1);
        assert_eq!(dead_letters[0].content, "poison");
        assert!(buffer.is_empty());
        assert_eq!(buffer.dropped(), 1);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut buffer = BatchBuffer::new().with_max_size(Some(2));
        for message in ["a", "b", "c"] {
            buffer.append(entry(message));
        }

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.dropped(), 1);
        assert_eq!(contents(&buffer.extract_batch(10)), vec!["b", "c"]);
    }

    #[test]
    fn test_timestamps_never_decrease() {
        let mut buffer = BatchBuffer::new();
        buffer.append(entry("late").with_timestamp(2_000));
        buffer.append(entry("early").with_timestamp(1_000));
        buffer.append(entry("later").with_timestamp(3_000));

        let timestamps: Vec<u64> = buffer.extract_batch(10).entries().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![2_000, 2_000, 3_000]);
    }

    #[test]
    fn test_batch_serializes_as_array() {
        let mut buffer = BatchBuffer::new();
        buffer.append(entry("a"));
        buffer.append(entry("b"));

        let value = serde_json::to_value(buffer.extract_batch(10)).unwrap();

        let array = value.as_array().unwrap();
        assert_eq!(array.len(), 2);
        assert_eq!(array[1]["content"], "b");
    }
}
