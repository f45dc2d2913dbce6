//! Test doubles shared by the engine tests.

use bytes::{Bytes, BytesMut};
use ipdr_wire::{Capabilities, Connect, FrameDecoder, Key, Message, Template};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Instant;
use tokio::sync::mpsc;

use crate::config::{CollectorConfig, ExporterConfig, SessionCollector, SessionConfig};
use crate::error::TransportError;
use crate::events::{ChannelEventSink, ExporterEvent};
use crate::exporter::Exporter;
use crate::model::{ConnId, Direction};
use crate::transport::Transport;

/// Transport that records everything the exporter does with it
#[derive(Debug, Default)]
pub(crate) struct RecordingTransport {
    pub sent: Vec<(ConnId, Bytes)>,
    pub disconnected: Vec<ConnId>,
    pub resets: Vec<ConnId>,
    pub failing: HashSet<ConnId>,
}

impl Transport for RecordingTransport {
    fn send(&mut self, conn: ConnId, bytes: Bytes) -> Result<(), TransportError> {
        if self.failing.contains(&conn) || self.disconnected.contains(&conn) {
            return Err(TransportError::Closed(conn));
        }
        self.sent.push((conn, bytes));
        Ok(())
    }

    fn disconnect(&mut self, conn: ConnId) {
        self.disconnected.push(conn);
    }

    fn reset(&mut self, conn: ConnId) {
        self.resets.push(conn);
    }
}

impl RecordingTransport {
    /// Remove and decode every message sent on `conn`
    pub fn take(&mut self, conn: ConnId) -> Vec<(u8, Message)> {
        let (mine, rest): (Vec<_>, Vec<_>) =
            self.sent.drain(..).partition(|(to, _)| *to == conn);
        self.sent = rest;
        mine.into_iter()
            .map(|(_, bytes)| {
                let mut buf = BytesMut::from(&bytes[..]);
                let frame = FrameDecoder::new().decode(&mut buf).unwrap().unwrap();
                assert!(buf.is_empty());
                (frame.header.session_id, frame.message().unwrap())
            })
            .collect()
    }

    /// Decoded messages sent on `conn` without their session ids
    pub fn take_messages(&mut self, conn: ConnId) -> Vec<Message> {
        self.take(conn).into_iter().map(|(_, m)| m).collect()
    }

    pub fn is_disconnected(&self, conn: ConnId) -> bool {
        self.disconnected.contains(&conn)
    }
}

pub(crate) type TestExporter = Exporter<RecordingTransport>;

pub(crate) const IP_A: [u8; 4] = [10, 0, 0, 1];
pub(crate) const IP_B: [u8; 4] = [10, 0, 0, 2];
pub(crate) const IP_C: [u8; 4] = [10, 0, 0, 3];

pub(crate) fn addr(ip: [u8; 4]) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip)), 40000)
}

pub(crate) fn collector(name: &str, ip: [u8; 4]) -> CollectorConfig {
    CollectorConfig {
        name: name.to_string(),
        address: IpAddr::V4(Ipv4Addr::from(ip)),
        port: None,
        dummy: false,
    }
}

/// Two templates: 1 {1, 2} and 2 {3}
pub(crate) fn templates() -> Vec<Template> {
    vec![
        Template::new(1, "DOCSIS", "CPE-Type")
            .with_key(Key::new(0x22, 1, "CmtsHostName"))
            .with_key(Key::new(0x122, 2, "RecCreationTime")),
        Template::new(2, "DOCSIS", "SAMIS-Type").with_key(Key::new(0x21, 3, "ServiceOctetsPassed")),
    ]
}

pub(crate) fn session_config(id: u8, members: &[(&str, u32)], negotiable: bool) -> SessionConfig {
    SessionConfig {
        id,
        name: format!("session-{}", id),
        description: "test session".to_string(),
        negotiable,
        collectors: members
            .iter()
            .map(|(name, priority)| SessionCollector {
                name: name.to_string(),
                priority: *priority,
            })
            .collect(),
        templates: templates(),
    }
}

/// Exporter with collectors `a`, `b`, `c` and the given sessions
pub(crate) fn exporter(
    config: ExporterConfig,
    sessions: Vec<SessionConfig>,
) -> (TestExporter, mpsc::UnboundedReceiver<ExporterEvent>) {
    let (sink, events) = ChannelEventSink::new();
    let mut exporter = Exporter::new(config, RecordingTransport::default()).with_event_sink(sink);
    exporter.add_collector(collector("a", IP_A));
    exporter.add_collector(collector("b", IP_B));
    exporter.add_collector(collector("c", IP_C));
    for session in sessions {
        exporter.add_session(session).unwrap();
    }
    (exporter, events)
}

pub(crate) fn connect_message(ip: [u8; 4], capabilities: Capabilities) -> Message {
    Message::Connect(Connect {
        initiator_id: u32::from(Ipv4Addr::from(ip)),
        initiator_port: 0,
        capabilities,
        keepalive_interval: 30,
        vendor_id: "test-collector".to_string(),
    })
}

/// Accept `conn` from `ip` and complete the handshake
pub(crate) fn connect(exporter: &mut TestExporter, conn: ConnId, ip: [u8; 4], now: Instant) {
    exporter.connection_opened(conn, addr(ip), Direction::Inbound, None, now);
    exporter.handle_message(conn, 0, connect_message(ip, Capabilities::all()), now);
    exporter.transport_mut().take(conn);
}

/// Connect and move the collector session to READY (or ACTIVE if selected)
pub(crate) fn start_flow(
    exporter: &mut TestExporter,
    conn: ConnId,
    ip: [u8; 4],
    session_id: u8,
    now: Instant,
) {
    connect(exporter, conn, ip, now);
    exporter.handle_message(conn, session_id, Message::FlowStart, now);
    exporter.handle_message(conn, session_id, Message::FinalTemplateDataAck, now);
}

pub(crate) fn drain(events: &mut mpsc::UnboundedReceiver<ExporterEvent>) -> Vec<ExporterEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}
