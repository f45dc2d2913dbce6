//! In-memory queue backend

use crate::{QueueError, QueuedRecord, RecordQueue};
use std::collections::VecDeque;
use tracing::debug;

/// In-memory outstanding-record queue
pub struct MemoryQueue {
    /// Held records in DSN order; the first `sent` of them are on the wire
    records: VecDeque<QueuedRecord>,
    /// Number of leading records already handed out
    sent: usize,
    /// Maximum number of held records
    capacity: usize,
    closed: bool,
}

impl MemoryQueue {
    /// Create a new in-memory queue
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            sent: 0,
            capacity,
            closed: false,
        }
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(crate::DEFAULT_QUEUE_CAPACITY)
    }
}

impl RecordQueue for MemoryQueue {
    fn enqueue(&mut self, record: QueuedRecord) -> Result<(), QueueError> {
        if self.closed {
            return Err(QueueError::Closed);
        }
        if self.records.len() >= self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }
        self.records.push_back(record);
        Ok(())
    }

    fn next_unsent(&mut self) -> Option<QueuedRecord> {
        let record = self.records.get(self.sent)?.clone();
        self.sent += 1;
        Some(record)
    }

    fn acknowledge(&mut self, dsn: u64) -> usize {
        let mut removed = 0;
        while self.sent > 0 && self.records.front().is_some_and(|r| r.dsn <= dsn) {
            self.records.pop_front();
            self.sent -= 1;
            removed += 1;
        }
        if removed > 0 {
            debug!(dsn, removed, remaining = self.records.len(), "queue acknowledge");
        }
        removed
    }

    fn rollback(&mut self) {
        for record in self.records.iter_mut().take(self.sent) {
            record.duplicate = true;
        }
        debug!(resend = self.sent, "queue rollback");
        self.sent = 0;
    }

    fn clear(&mut self) {
        debug!(dropped = self.records.len(), "queue clear");
        self.records.clear();
        self.sent = 0;
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn outstanding(&self) -> usize {
        self.records.len() - self.sent
    }

    fn unacknowledged(&self) -> usize {
        self.sent
    }

    fn oldest_unacknowledged(&self) -> Option<u64> {
        self.records.front().map(|r| r.dsn)
    }

    fn next_unsent_dsn(&self) -> Option<u64> {
        self.records.get(self.sent).map(|r| r.dsn)
    }
}
