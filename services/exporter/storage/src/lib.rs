//! Outstanding-record storage for IPDR sessions with pluggable backends.
//!
//! Every record accepted from the application is held here until the active
//! collector acknowledges it. A queue keeps records in sequence order and
//! tracks how many of them have already been handed to the transport, so a
//! collector switch can roll back and resend everything still unacknowledged.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One record awaiting delivery or acknowledgement
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedRecord {
    /// Data sequence number
    pub dsn: u64,
    /// Template the record was encoded with
    pub template_id: u16,
    /// Configuration id of the template's context
    pub config_id: u16,
    /// Opaque encoded record
    pub payload: Bytes,
    /// Set once the record has been sent on a path that was later abandoned
    pub duplicate: bool,
}

/// Queue errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Queue reached its configured capacity
    #[error("Queue full (capacity {capacity})")]
    Full {
        /// Configured capacity
        capacity: usize,
    },
    /// Queue no longer accepts records
    #[error("Queue closed")]
    Closed,
}

/// Outstanding-record queue for one session.
///
/// Records are kept in ascending DSN order. The queue distinguishes records
/// not yet sent (`outstanding`) from records sent but not yet acknowledged
/// (`unacknowledged`).
pub trait RecordQueue: Send {
    /// Append a record
    fn enqueue(&mut self, record: QueuedRecord) -> Result<(), QueueError>;

    /// Hand out the next record that has not been sent yet and mark it sent
    fn next_unsent(&mut self) -> Option<QueuedRecord>;

    /// Drop every sent record with a DSN up to and including `dsn`.
    ///
    /// Records not yet sent are kept. Returns the number of records
    /// removed; acknowledging the same DSN again removes nothing.
    fn acknowledge(&mut self, dsn: u64) -> usize;

    /// Mark every sent record as unsent again so it is resent as a duplicate
    fn rollback(&mut self);

    /// Drop every record
    fn clear(&mut self);

    /// Stop accepting records
    fn close(&mut self);

    /// Number of records not yet sent
    fn outstanding(&self) -> usize;

    /// Number of records sent but not yet acknowledged
    fn unacknowledged(&self) -> usize;

    /// DSN of the oldest record still held, sent or not
    fn oldest_unacknowledged(&self) -> Option<u64>;

    /// DSN of the next record [`RecordQueue::next_unsent`] would hand out
    fn next_unsent_dsn(&self) -> Option<u64>;
}

/// Queue backend configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueMode {
    /// In-memory queue bounded to `capacity` records
    InMemory {
        /// Maximum number of held records
        capacity: usize,
    },
}

impl Default for QueueMode {
    fn default() -> Self {
        QueueMode::InMemory {
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Default number of records an in-memory queue holds
pub const DEFAULT_QUEUE_CAPACITY: usize = 65536;

// Re-export backend implementations
pub use backend::mem::MemoryQueue;

impl QueueMode {
    /// Create a queue from configuration
    pub fn build(&self) -> Box<dyn RecordQueue> {
        match self {
            QueueMode::InMemory { capacity } => Box::new(MemoryQueue::new(*capacity)),
        }
    }
}
