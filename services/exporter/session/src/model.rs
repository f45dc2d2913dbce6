//! Exporter state: collectors, connections, sessions and their pairings.
//!
//! Entities reference each other through ids rather than pointers. A
//! `Collector` knows its `ConnId`, a `Connection` knows its `CollectorId`, and
//! every `Session` owns one `CollectorSession` per participating collector.

use ipdr_storage::RecordQueue;
use ipdr_wire::{Capabilities, Template, TemplateFlags, TemplateSet, DOCUMENT_ID_LEN};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::config::CollectorConfig;

/// Index of a configured collector
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct CollectorId(pub usize);

impl fmt::Display for CollectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "collector#{}", self.0)
    }
}

/// Transport connection identifier
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Address of one collector session: session index plus collector
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct CsKey {
    /// Index into the exporter's session list
    pub session: usize,
    /// Collector of the pairing
    pub collector: CollectorId,
}

/// Connection handshake state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No CONNECT exchanged yet
    Disconnected,
    /// CONNECT sent, awaiting CONNECT_RESPONSE
    WaitResponse,
    /// Handshake complete
    Connected,
}

/// Which side opened the connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Accepted from a collector
    Inbound,
    /// Dialled by the exporter
    Outbound,
}

/// Collector session state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CsState {
    /// No flow on this path
    Disconnected,
    /// Templates announced, awaiting FINAL_TEMPLATE_DATA_ACK
    Initiation,
    /// Templates accepted, standing by
    Ready,
    /// Streaming records
    Active,
}

impl CsState {
    /// Whether the path may be selected as the session's active path
    pub fn is_eligible(self) -> bool {
        !matches!(self, CsState::Disconnected)
    }
}

/// Traffic counters of one connection
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Messages received
    pub messages_in: u64,
    /// Messages sent
    pub messages_out: u64,
    /// Bytes received
    pub bytes_in: u64,
    /// Bytes sent
    pub bytes_out: u64,
}

/// Delivery counters of one session
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Records accepted from the application
    pub records_enqueued: u64,
    /// DATA messages sent
    pub records_sent: u64,
    /// Records acknowledged by the active collector
    pub records_acked: u64,
    /// Records the queue refused
    pub records_lost: u64,
    /// DATA messages sent with the duplicate flag
    pub retransmitted: u64,
    /// Active path changes
    pub switches: u64,
}

/// A remote peer
#[derive(Debug)]
pub struct Collector {
    /// Static configuration
    pub config: CollectorConfig,
    /// Identity adopted by a dummy collector on its first CONNECT
    pub resolved: Option<Ipv4Addr>,
    /// Live connection, if any
    pub conn: Option<ConnId>,
}

impl Collector {
    pub(crate) fn new(config: CollectorConfig) -> Self {
        Self {
            config,
            resolved: None,
            conn: None,
        }
    }

    /// Collector name
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// One transport association
#[derive(Debug)]
pub struct Connection {
    /// Identifier
    pub id: ConnId,
    /// Remote address
    pub peer: SocketAddr,
    /// Opening side
    pub direction: Direction,
    /// Handshake state
    pub state: ConnectionState,
    /// Collector bound to the connection once identified
    pub collector: Option<CollectorId>,
    /// Pairwise capabilities (local AND remote)
    pub capabilities: Capabilities,
    /// KEEP_ALIVE send period
    pub keepalive_out: Duration,
    /// Invalid-state violations seen so far
    pub invalid_state_count: u32,
    /// Counters
    pub stats: ConnectionStats,
}

/// Negotiated template generation of a session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransmissionContext {
    /// Configuration id
    pub config_id: u16,
    /// Templates in announcement order
    pub templates: Vec<Template>,
    /// Whether collectors may modify the templates
    pub negotiable: bool,
}

impl TransmissionContext {
    /// Look up a template by id
    pub fn template(&self, template_id: u16) -> Option<&Template> {
        self.templates.iter().find(|t| t.template_id == template_id)
    }

    /// Wire form of the context
    pub fn to_template_set(&self) -> TemplateSet {
        let flags = if self.negotiable {
            TemplateFlags::NEGOTIABLE
        } else {
            TemplateFlags::empty()
        };
        TemplateSet {
            config_id: self.config_id,
            flags,
            templates: self.templates.clone(),
        }
    }
}

/// Reference to a template of a specific transmission context
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TemplateHandle {
    /// Configuration id the handle was issued for
    pub config_id: u16,
    /// Template id
    pub template_id: u16,
}

/// Pairing of a session with one collector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorSession {
    /// Collector of the pairing
    pub collector: CollectorId,
    /// Priority, lower is preferred
    pub priority: u32,
    /// State
    pub state: CsState,
    /// TEMPLATE_DATA already sent for the current initiation
    pub templates_sent: bool,
}

/// One logical record stream
pub struct Session {
    /// Wire session id
    pub id: u8,
    /// Name
    pub name: String,
    /// Description
    pub description: String,
    /// Whether collectors may renegotiate templates
    pub negotiable: bool,
    /// Whether the application may submit records
    pub running: bool,
    /// Sequence number of the next record
    pub next_dsn: u64,
    /// Current template generation
    pub context: TransmissionContext,
    /// Collector currently streaming the session
    pub active: Option<CollectorId>,
    /// One pairing per participating collector, in configuration order
    pub paths: Vec<CollectorSession>,
    /// Records awaiting delivery or acknowledgement
    pub queue: Box<dyn RecordQueue>,
    /// The next SESSION_START follows a sequence discontinuity
    pub sync_needed: bool,
    /// Document id carried by SESSION_START
    pub document_id: [u8; DOCUMENT_ID_LEN],
    /// Counters
    pub stats: SessionStats,
}

impl Session {
    /// Pairing with `collector`
    pub fn path(&self, collector: CollectorId) -> Option<&CollectorSession> {
        self.paths.iter().find(|p| p.collector == collector)
    }

    pub(crate) fn path_mut(&mut self, collector: CollectorId) -> Option<&mut CollectorSession> {
        self.paths.iter_mut().find(|p| p.collector == collector)
    }

    /// State of the pairing with `collector`
    pub fn path_state(&self, collector: CollectorId) -> Option<CsState> {
        self.path(collector).map(|p| p.state)
    }

    /// Eligible path with the numerically lowest priority; ties go to the
    /// earlier configured collector
    pub fn best_eligible(&self) -> Option<CollectorId> {
        self.paths
            .iter()
            .filter(|p| p.state.is_eligible())
            .min_by_key(|p| p.priority)
            .map(|p| p.collector)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("running", &self.running)
            .field("next_dsn", &self.next_dsn)
            .field("config_id", &self.context.config_id)
            .field("active", &self.active)
            .field("paths", &self.paths)
            .field("outstanding", &self.queue.outstanding())
            .field("unacknowledged", &self.queue.unacknowledged())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipdr_storage::MemoryQueue;

    fn path(collector: usize, priority: u32, state: CsState) -> CollectorSession {
        CollectorSession {
            collector: CollectorId(collector),
            priority,
            state,
            templates_sent: false,
        }
    }

    fn session(paths: Vec<CollectorSession>) -> Session {
        Session {
            id: 1,
            name: "s".to_string(),
            description: String::new(),
            negotiable: false,
            running: true,
            next_dsn: 0,
            context: TransmissionContext {
                config_id: 0,
                templates: Vec::new(),
                negotiable: false,
            },
            active: None,
            paths,
            queue: Box::new(MemoryQueue::new(8)),
            sync_needed: true,
            document_id: [0; DOCUMENT_ID_LEN],
            stats: SessionStats::default(),
        }
    }

    #[test]
    fn test_best_eligible_picks_lowest_priority() {
        let s = session(vec![
            path(0, 5, CsState::Ready),
            path(1, 2, CsState::Initiation),
            path(2, 8, CsState::Active),
        ]);
        assert_eq!(s.best_eligible(), Some(CollectorId(1)));
    }

    #[test]
    fn test_best_eligible_skips_disconnected_and_breaks_ties_in_order() {
        let s = session(vec![
            path(0, 1, CsState::Disconnected),
            path(1, 3, CsState::Ready),
            path(2, 3, CsState::Ready),
        ]);
        assert_eq!(s.best_eligible(), Some(CollectorId(1)));

        let s = session(vec![path(0, 1, CsState::Disconnected)]);
        assert_eq!(s.best_eligible(), None);
    }
}
