//! Notifications to the embedding application and its decision hooks.

use ipdr_wire::{Capabilities, ErrorCode};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::model::{CollectorId, ConnId, TransmissionContext};

/// Events emitted by the exporter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExporterEvent {
    /// A transport connection was registered
    ConnectionUp {
        /// Connection
        conn: ConnId,
        /// Remote address
        peer: SocketAddr,
    },
    /// A transport connection was released
    ConnectionDown {
        /// Connection
        conn: ConnId,
        /// Collector bound to the connection, if identified
        collector: Option<CollectorId>,
        /// Why it was released
        reason: String,
    },
    /// Handshake completed with a collector
    CollectorConnected {
        /// Collector
        collector: CollectorId,
        /// Pairwise capabilities
        capabilities: Capabilities,
    },
    /// A collector became the active path of a session
    SessionActive {
        /// Session id
        session: u8,
        /// New active collector
        collector: CollectorId,
    },
    /// No collector can carry a session
    AllServersDisconnected {
        /// Session id
        session: u8,
    },
    /// A record could not be queued
    RecordLost {
        /// Session id
        session: u8,
        /// Sequence number the record was assigned
        dsn: u64,
    },
    /// Every queued record was acknowledged
    QueueEmpty {
        /// Session id
        session: u8,
    },
    /// A session moved to a new transmission context
    TemplatesChanged {
        /// Session id
        session: u8,
        /// New configuration id
        config_id: u16,
    },
    /// A collector reported an error
    ErrorReceived {
        /// Reporting collector, if identified
        collector: Option<CollectorId>,
        /// Error code
        code: ErrorCode,
        /// Description
        description: String,
    },
}

/// Receiver of exporter events
pub trait EventSink: Send {
    /// Deliver one event
    fn notify(&self, event: ExporterEvent);
}

/// Logs events through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn notify(&self, event: ExporterEvent) {
        match event {
            ExporterEvent::AllServersDisconnected { session } => {
                warn!(session, "all collectors disconnected");
            }
            ExporterEvent::RecordLost { session, dsn } => {
                warn!(session, dsn, "record lost");
            }
            ExporterEvent::ErrorReceived {
                collector,
                code,
                description,
            } => {
                warn!(?collector, ?code, %description, "collector reported error");
            }
            other => info!(event = ?other, "exporter event"),
        }
    }
}

/// Forwards events to a channel
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<ExporterEvent>,
}

impl ChannelEventSink {
    /// Create a sink and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ExporterEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn notify(&self, event: ExporterEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

/// Application decisions consulted by the protocol engine
pub trait ApplicationHooks: Send {
    /// Whether `collector` may start a flow on `session`
    fn flow_start(&self, _session: u8, _collector: CollectorId) -> bool {
        true
    }

    /// Whether `collector` may renegotiate the templates of `session`
    fn start_negotiation(&self, _session: u8, _collector: CollectorId) -> bool {
        true
    }

    /// A collector changed the enabled fields of `session`
    fn templates_changed(&self, _session: u8, _context: &TransmissionContext) {}
}

/// Hooks that allow everything
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl ApplicationHooks for DefaultHooks {}
