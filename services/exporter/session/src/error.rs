//! Local error types of the exporter.
//!
//! These are returned to the caller of an exporter operation and never sent
//! on the wire; protocol violations are answered with ERROR messages instead.

use ipdr_storage::QueueError;
use thiserror::Error;

use crate::model::ConnId;

/// Exporter operation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExporterError {
    /// Session id is not configured
    #[error("unknown session {0}")]
    UnknownSession(u8),

    /// Session is configured twice
    #[error("session {0} configured more than once")]
    DuplicateSession(u8),

    /// Session does not accept records
    #[error("session {0} is not running")]
    SessionNotRunning(u8),

    /// Template handle does not belong to the active transmission context
    #[error("stale template handle (config {config_id}, template {template_id})")]
    StaleTemplate {
        /// Configuration id of the handle
        config_id: u16,
        /// Template id of the handle
        template_id: u16,
    },

    /// Template has no enabled field
    #[error("template {0} has no enabled field")]
    TemplateDisabled(u16),

    /// Record could not be queued
    #[error("record lost: {0}")]
    RecordLost(#[from] QueueError),

    /// Collector name is not configured
    #[error("unknown collector {0}")]
    UnknownCollector(String),

    /// Exporter is shutting down
    #[error("exporter shut down")]
    Shutdown,
}

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection is gone or its writer stopped
    #[error("{0} is closed")]
    Closed(ConnId),
}
