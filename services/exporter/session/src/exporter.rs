//! The exporter context: owns every collector, connection and session and
//! serializes all protocol handling.
//!
//! The exporter performs no I/O of its own. Inbound frames, connection
//! changes, timer deadlines and application requests are fed in by the caller
//! together with the current instant; outbound bytes leave through the
//! [`Transport`].

use bytes::Bytes;
use ipdr_storage::QueueError;
use ipdr_wire::{ErrorCode, ErrorReport, Frame, Message, WireError};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, trace, warn};

use crate::config::{CollectorConfig, ExporterConfig, SessionConfig};
use crate::error::ExporterError;
use crate::events::{ApplicationHooks, DefaultHooks, EventSink, ExporterEvent, TracingEventSink};
use crate::model::{
    Collector, CollectorId, CollectorSession, ConnId, Connection, ConnectionState, CsKey, CsState,
    Session, SessionStats, TemplateHandle, TransmissionContext,
};
use crate::timer::{TimerKind, TimerService};
use crate::transport::Transport;

static BOOT_TIME: Lazy<u32> = Lazy::new(unix_time);

/// Seconds since the Unix epoch
pub(crate) fn unix_time() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Process start time reported in SESSION_START
pub(crate) fn boot_time() -> u32 {
    *BOOT_TIME
}

/// IPDR exporter protocol engine
pub struct Exporter<T: Transport> {
    pub(crate) config: ExporterConfig,
    pub(crate) transport: T,
    pub(crate) collectors: Vec<Collector>,
    pub(crate) sessions: Vec<Session>,
    pub(crate) connections: HashMap<ConnId, Connection>,
    pub(crate) timers: TimerService,
    pub(crate) events: Box<dyn EventSink>,
    pub(crate) hooks: Box<dyn ApplicationHooks>,
    pub(crate) shutting_down: bool,
    pending_drops: Vec<(ConnId, String)>,
}

impl<T: Transport> Exporter<T> {
    /// Create an exporter with no collectors or sessions
    pub fn new(config: ExporterConfig, transport: T) -> Self {
        // Pin the boot time to the first exporter created
        Lazy::force(&BOOT_TIME);
        Self {
            config,
            transport,
            collectors: Vec::new(),
            sessions: Vec::new(),
            connections: HashMap::new(),
            timers: TimerService::new(),
            events: Box::new(TracingEventSink),
            hooks: Box::new(DefaultHooks),
            shutting_down: false,
            pending_drops: Vec::new(),
        }
    }

    /// Replace the event sink
    pub fn with_event_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.events = Box::new(sink);
        self
    }

    /// Replace the application hooks
    pub fn with_hooks(mut self, hooks: impl ApplicationHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    /// Register a collector
    pub fn add_collector(&mut self, config: CollectorConfig) -> CollectorId {
        let id = CollectorId(self.collectors.len());
        info!(collector = %config.name, address = %config.address, dummy = config.dummy, "collector configured");
        self.collectors.push(Collector::new(config));
        id
    }

    /// Register a session and its collector pairings
    pub fn add_session(&mut self, config: SessionConfig) -> Result<(), ExporterError> {
        if self.session_index(config.id).is_some() {
            return Err(ExporterError::DuplicateSession(config.id));
        }

        let mut paths = Vec::with_capacity(config.collectors.len());
        for member in &config.collectors {
            let collector = self
                .collector_by_name(&member.name)
                .ok_or_else(|| ExporterError::UnknownCollector(member.name.clone()))?;
            paths.push(CollectorSession {
                collector,
                priority: member.priority,
                state: CsState::Disconnected,
                templates_sent: false,
            });
        }
        // Priority ties resolve in collector configuration order
        paths.sort_by_key(|p| p.collector);

        info!(session = config.id, name = %config.name, paths = paths.len(), "session configured");
        self.sessions.push(Session {
            id: config.id,
            name: config.name,
            description: config.description,
            negotiable: config.negotiable,
            running: true,
            next_dsn: 0,
            context: TransmissionContext {
                config_id: 0,
                templates: config.templates,
                negotiable: config.negotiable,
            },
            active: None,
            paths,
            queue: self.config.queue.build(),
            sync_needed: true,
            document_id: uuid::Uuid::new_v4().into_bytes(),
            stats: SessionStats::default(),
        });
        Ok(())
    }

    /// Engine configuration
    pub fn config(&self) -> &ExporterConfig {
        &self.config
    }

    /// Transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable transport access for registering connections
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Configured collector
    pub fn collector(&self, id: CollectorId) -> Option<&Collector> {
        self.collectors.get(id.0)
    }

    /// Find a collector by name
    pub fn collector_by_name(&self, name: &str) -> Option<CollectorId> {
        self.collectors
            .iter()
            .position(|c| c.config.name == name)
            .map(CollectorId)
    }

    /// Session by wire id
    pub fn session(&self, session_id: u8) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == session_id)
    }

    /// Every session
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Live connection
    pub fn connection(&self, conn: ConnId) -> Option<&Connection> {
        self.connections.get(&conn)
    }

    /// Handle for `template_id` in the session's current context
    pub fn template_handle(&self, session_id: u8, template_id: u16) -> Option<TemplateHandle> {
        let session = self.session(session_id)?;
        session.context.template(template_id)?;
        Some(TemplateHandle {
            config_id: session.context.config_id,
            template_id,
        })
    }

    /// Collectors the exporter dials, with their addresses
    pub fn dial_targets(&self) -> Vec<(CollectorId, SocketAddr)> {
        self.collectors
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.config.dummy)
            .filter_map(|(i, c)| {
                c.config
                    .port
                    .map(|port| (CollectorId(i), SocketAddr::new(c.config.address, port)))
            })
            .collect()
    }

    /// Whether `collector` lacks a connection and should be dialled
    pub fn needs_dial(&self, collector: CollectorId) -> bool {
        !self.shutting_down
            && self
                .collectors
                .get(collector.0)
                .is_some_and(|c| c.conn.is_none())
    }

    /// Earliest pending timer deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Fire every timer due at `now`
    pub fn poll_timers(&mut self, now: Instant) {
        while let Some(kind) = self.timers.pop_expired(now) {
            trace!(?kind, "timer fired");
            match kind {
                TimerKind::KeepAliveIn(conn) => self.keepalive_in_expired(conn, now),
                TimerKind::KeepAliveOut(conn) => self.keepalive_out_expired(conn, now),
                TimerKind::ConnectResponse(conn) => self.connect_response_expired(conn, now),
                TimerKind::TemplateAck(key) => self.template_ack_expired(key, now),
                TimerKind::WindowSize(key) => self.window_expired(key, now),
                TimerKind::BestCollectorWait(session) => {
                    self.best_collector_wait_expired(session, now)
                }
            }
            self.finish(now);
        }
    }

    /// Process one frame read from `conn`
    pub fn handle_frame(&mut self, conn: ConnId, frame: Frame, now: Instant) {
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.stats.bytes_in += u64::from(frame.header.length);
        }
        match frame.message() {
            Ok(message) => self.handle_message(conn, frame.header.session_id, message, now),
            Err(error) => self.frame_error(conn, error, now),
        }
    }

    /// The byte stream of `conn` could not be decoded
    pub fn frame_error(&mut self, conn: ConnId, error: WireError, now: Instant) {
        warn!(%conn, %error, "undecodable message");
        self.send_error(conn, 0, ErrorCode::MessageDecodeError, error.to_string(), now);
        self.schedule_drop(conn, format!("decode error: {}", error));
        self.finish(now);
    }

    /// Process one decoded message received on `conn`
    pub fn handle_message(&mut self, conn: ConnId, session_id: u8, message: Message, now: Instant) {
        let Some(connection) = self.connections.get_mut(&conn) else {
            debug!(%conn, "message for released connection dropped");
            return;
        };
        connection.stats.messages_in += 1;
        debug!(%conn, session_id, message_id = ?message.message_id(), "received");
        self.timers.arm(
            TimerKind::KeepAliveIn(conn),
            now + self.config.keepalive_interval,
        );

        self.dispatch(conn, session_id, message, now);
        self.finish(now);
    }

    fn dispatch(&mut self, conn: ConnId, session_id: u8, message: Message, now: Instant) {
        let message_id = message.message_id();
        match message {
            Message::Connect(connect) => self.handle_connect(conn, connect, now),
            Message::ConnectResponse(response) => self.handle_connect_response(conn, response, now),
            Message::Disconnect => {
                info!(%conn, "peer sent DISCONNECT");
                self.schedule_drop(conn, "peer disconnected".to_string());
            }
            Message::KeepAlive => trace!(%conn, "keepalive"),
            Message::Error(report) => self.handle_error_report(conn, report),
            Message::GetSessions { request_id } => {
                if let Some(collector) = self.connected_collector(conn, session_id, now) {
                    self.handle_get_sessions(conn, collector, request_id, now);
                }
            }
            Message::FlowStart => self.with_session(conn, session_id, now, |this, key| {
                this.handle_flow_start(conn, key, now)
            }),
            Message::FlowStop {
                reason_code,
                reason_info,
            } => self.with_session(conn, session_id, now, |this, key| {
                this.handle_flow_stop(key, reason_code, &reason_info, now)
            }),
            Message::FinalTemplateDataAck => self.with_session(conn, session_id, now, |this, key| {
                this.handle_final_template_ack(conn, key, now)
            }),
            Message::GetTemplates { request_id } => {
                self.with_session(conn, session_id, now, |this, key| {
                    this.handle_get_templates(conn, key, request_id, now)
                })
            }
            Message::ModifyTemplate(set) => self.with_session(conn, session_id, now, |this, key| {
                this.handle_modify_template(conn, key, set, now)
            }),
            Message::StartNegotiation => self.with_session(conn, session_id, now, |this, key| {
                this.handle_start_negotiation(conn, key, now)
            }),
            Message::DataAck {
                config_id,
                sequence_num,
            } => self.with_session(conn, session_id, now, |this, key| {
                this.handle_data_ack(key, config_id, sequence_num, now, false)
            }),
            Message::SessionStart(_)
            | Message::SessionStop { .. }
            | Message::TemplateData(_)
            | Message::GetSessionsResponse { .. }
            | Message::GetTemplatesResponse { .. }
            | Message::ModifyTemplateResponse(_)
            | Message::StartNegotiationReject
            | Message::Data(_) => self.protocol_violation(
                conn,
                session_id,
                ErrorCode::MessageInvalidForState,
                format!("{:?} is never sent to an exporter", message_id),
                now,
            ),
        }
    }

    /// Collector bound to a connection that completed its handshake
    fn connected_collector(
        &mut self,
        conn: ConnId,
        session_id: u8,
        now: Instant,
    ) -> Option<CollectorId> {
        let connection = self.connections.get(&conn)?;
        match (connection.state, connection.collector) {
            (ConnectionState::Connected, Some(collector)) => Some(collector),
            _ => {
                self.protocol_violation(
                    conn,
                    session_id,
                    ErrorCode::InvalidConnectionState,
                    "handshake not complete".to_string(),
                    now,
                );
                None
            }
        }
    }

    /// Resolve the collector session addressed by a session-scoped message
    fn with_session<F>(&mut self, conn: ConnId, session_id: u8, now: Instant, handler: F)
    where
        F: FnOnce(&mut Self, CsKey),
    {
        let Some(collector) = self.connected_collector(conn, session_id, now) else {
            return;
        };
        let Some(session) = self.session_index(session_id) else {
            warn!(%conn, session_id, "message for unknown session");
            self.send_error(
                conn,
                session_id,
                ErrorCode::UnknownSession,
                format!("session {} is not configured", session_id),
                now,
            );
            return;
        };
        if self.sessions[session].path(collector).is_none() {
            warn!(%conn, session_id, %collector, "collector is not part of session");
            self.send_error(
                conn,
                session_id,
                ErrorCode::CollectorNotInSession,
                format!("collector is not configured for session {}", session_id),
                now,
            );
            return;
        }
        handler(self, CsKey { session, collector });
    }

    fn handle_error_report(&mut self, conn: ConnId, report: ErrorReport) {
        let collector = self.connections.get(&conn).and_then(|c| c.collector);
        warn!(%conn, code = ?report.code, description = %report.description, "ERROR received");
        self.emit(ExporterEvent::ErrorReceived {
            collector,
            code: report.code,
            description: report.description,
        });
    }

    pub(crate) fn session_index(&self, session_id: u8) -> Option<usize> {
        self.sessions.iter().position(|s| s.id == session_id)
    }

    pub(crate) fn emit(&self, event: ExporterEvent) {
        self.events.notify(event);
    }

    /// Encode and send `message`; a failed send schedules the connection for
    /// release and returns false
    pub(crate) fn send_message(
        &mut self,
        conn: ConnId,
        session_id: u8,
        message: &Message,
        now: Instant,
    ) -> bool {
        debug_assert!(
            !message.message_id().requires_session() || self.session_index(session_id).is_some(),
            "{:?} addressed to unconfigured session {}",
            message.message_id(),
            session_id
        );
        let Some(connection) = self.connections.get_mut(&conn) else {
            return false;
        };
        let bytes: Bytes = message.encode(session_id);
        let len = bytes.len() as u64;
        match self.transport.send(conn, bytes) {
            Ok(()) => {
                connection.stats.messages_out += 1;
                connection.stats.bytes_out += len;
                trace!(%conn, session_id, message_id = ?message.message_id(), "sent");
                if connection.state == ConnectionState::Connected {
                    let period = connection.keepalive_out;
                    self.timers.arm(TimerKind::KeepAliveOut(conn), now + period);
                }
                true
            }
            Err(error) => {
                tracing::error!(%conn, %error, "send failed");
                self.schedule_drop(conn, format!("send failed: {}", error));
                false
            }
        }
    }

    pub(crate) fn send_error(
        &mut self,
        conn: ConnId,
        session_id: u8,
        code: ErrorCode,
        description: String,
        now: Instant,
    ) -> bool {
        let report = ErrorReport {
            timestamp: unix_time(),
            code,
            description,
        };
        self.send_message(conn, session_id, &Message::Error(report), now)
    }

    /// Answer a message that is not valid in the current state; repeated
    /// violations release the connection
    pub(crate) fn protocol_violation(
        &mut self,
        conn: ConnId,
        session_id: u8,
        code: ErrorCode,
        description: String,
        now: Instant,
    ) {
        warn!(%conn, session_id, ?code, %description, "protocol violation");
        self.send_error(conn, session_id, code, description, now);
        let count = match self.connections.get_mut(&conn) {
            Some(connection) => {
                connection.invalid_state_count += 1;
                connection.invalid_state_count
            }
            None => return,
        };
        if count >= self.config.max_invalid_state {
            self.schedule_drop(conn, format!("{} invalid-state messages", count));
        }
    }

    /// Release `conn` once the current handler has finished
    pub(crate) fn schedule_drop(&mut self, conn: ConnId, reason: String) {
        if !self.pending_drops.iter().any(|(c, _)| *c == conn) {
            self.pending_drops.push((conn, reason));
        }
    }

    /// Release every connection scheduled during the last handler
    pub(crate) fn finish(&mut self, now: Instant) {
        while let Some((conn, reason)) = self.pending_drops.pop() {
            self.close_connection(conn, &reason, now);
        }
    }

    /// Tear down `conn`, its timers and every collector session it carried
    pub(crate) fn close_connection(&mut self, conn: ConnId, reason: &str, now: Instant) {
        let Some(connection) = self.connections.remove(&conn) else {
            return;
        };
        for kind in [
            TimerKind::KeepAliveIn(conn),
            TimerKind::KeepAliveOut(conn),
            TimerKind::ConnectResponse(conn),
        ] {
            self.timers.cancel(kind);
        }
        self.transport.disconnect(conn);
        info!(%conn, peer = %connection.peer, reason, "connection released");

        if let Some(collector) = connection.collector {
            if self.collectors[collector.0].conn == Some(conn) {
                self.collectors[collector.0].conn = None;
                self.reset_collector_paths(collector, now);
            }
        }

        self.emit(ExporterEvent::ConnectionDown {
            conn,
            collector: connection.collector,
            reason: reason.to_string(),
        });
    }

    /// Every collector session of `collector` loses its path
    fn reset_collector_paths(&mut self, collector: CollectorId, now: Instant) {
        let mut affected = Vec::new();
        for index in 0..self.sessions.len() {
            let key = CsKey {
                session: index,
                collector,
            };
            let session = &mut self.sessions[index];
            let Some(path) = session.path_mut(collector) else {
                continue;
            };
            let was_eligible = path.state.is_eligible();
            path.state = CsState::Disconnected;
            path.templates_sent = false;
            self.timers.cancel(TimerKind::TemplateAck(key));
            self.timers.cancel(TimerKind::WindowSize(key));

            if session.active == Some(collector) {
                session.active = None;
                session.sync_needed = true;
                affected.push(index);
            } else if was_eligible && session.active.is_none() {
                affected.push(index);
            }
        }
        for index in affected {
            self.select_collector(index, false, None, now);
        }
    }

    /// Stop every session and release every connection
    pub fn shutdown(&mut self, now: Instant) {
        info!("exporter shutting down");
        self.shutting_down = true;
        for index in 0..self.sessions.len() {
            self.stop_active(
                index,
                ipdr_wire::SessionStopReason::ExporterTerminating,
                "exporter terminating",
                CsState::Ready,
                now,
            );
            let session = &mut self.sessions[index];
            session.running = false;
            session.queue.close();
        }

        let conns: Vec<ConnId> = self.connections.keys().copied().collect();
        for conn in conns {
            let connected = self
                .connections
                .get(&conn)
                .is_some_and(|c| c.state == ConnectionState::Connected);
            if connected {
                self.send_message(conn, 0, &Message::Disconnect, now);
            }
            self.schedule_drop(conn, "exporter shutting down".to_string());
        }
        self.finish(now);
    }

    /// Drop every queued record of the session at `index`; they count as lost
    pub(crate) fn discard_queue(&mut self, index: usize) {
        let session = &mut self.sessions[index];
        let discarded = (session.queue.outstanding() + session.queue.unacknowledged()) as u64;
        session.queue.clear();
        if discarded > 0 {
            session.stats.records_lost += discarded;
            warn!(session = session.id, discarded, "queued records dropped");
        }
    }

    pub(crate) fn record_lost(&mut self, index: usize, dsn: u64, error: &QueueError) {
        let session = &mut self.sessions[index];
        session.stats.records_lost += 1;
        let session_id = session.id;
        warn!(session = session_id, dsn, %error, "record lost");
        self.emit(ExporterEvent::RecordLost {
            session: session_id,
            dsn,
        });
    }
}
