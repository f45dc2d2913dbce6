//! Collector session state machine and failover.
//!
//! Every session pairs with each of its collectors through a
//! [`CollectorSession`](crate::model::CollectorSession):
//!
//! ```text
//! DISCONNECTED --FLOW_START--> INITIATION --FINAL_TEMPLATE_DATA_ACK--> READY
//!                                                                     |  ^
//!                                        select_collector (best path) v  | HANDING_OFF
//!                                                                    ACTIVE
//! ```
//!
//! At most one path per session is ACTIVE. `select_collector` picks the
//! eligible path with the numerically lowest priority and moves the session
//! onto it, stopping the previous active path first.

use ipdr_wire::{ErrorCode, Message, SessionStart, SessionStopReason};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::error::ExporterError;
use crate::events::ExporterEvent;
use crate::exporter::{boot_time, Exporter};
use crate::model::{CollectorId, ConnId, ConnectionState, CsKey, CsState};
use crate::timer::TimerKind;
use crate::transport::Transport;

impl<T: Transport> Exporter<T> {
    /// Let `session_id` accept records and pick an active path
    pub fn start_session(&mut self, session_id: u8, now: Instant) -> Result<(), ExporterError> {
        if self.shutting_down {
            return Err(ExporterError::Shutdown);
        }
        let index = self
            .session_index(session_id)
            .ok_or(ExporterError::UnknownSession(session_id))?;
        let session = &mut self.sessions[index];
        if session.running {
            return Ok(());
        }
        session.running = true;
        info!(session = session_id, "session started");
        if session.active.is_none() {
            self.select_collector(index, false, None, now);
        }
        self.finish(now);
        Ok(())
    }

    /// Stop streaming `session_id`; queued records are kept
    pub fn stop_session(&mut self, session_id: u8, now: Instant) -> Result<(), ExporterError> {
        if self.shutting_down {
            return Err(ExporterError::Shutdown);
        }
        let index = self
            .session_index(session_id)
            .ok_or(ExporterError::UnknownSession(session_id))?;
        self.sessions[index].running = false;
        info!(session = session_id, "session stopped");
        self.stop_active(
            index,
            SessionStopReason::EndOfData,
            "session stopped",
            CsState::Ready,
            now,
        );
        self.finish(now);
        Ok(())
    }

    /// Connection of `collector` if its handshake is complete
    pub(crate) fn live_conn(&self, collector: CollectorId) -> Option<ConnId> {
        let conn = self.collectors.get(collector.0)?.conn?;
        let connection = self.connections.get(&conn)?;
        (connection.state == ConnectionState::Connected).then_some(conn)
    }

    /// Move the session at `index` to its best path.
    ///
    /// `force_cs` overrides the choice; `force_negotiate` sends the chosen
    /// path through TEMPLATE_DATA again even if it is READY or ACTIVE.
    pub(crate) fn select_collector(
        &mut self,
        index: usize,
        force_negotiate: bool,
        force_cs: Option<CollectorId>,
        now: Instant,
    ) {
        if self.shutting_down {
            return;
        }
        let session = &self.sessions[index];
        let session_id = session.id;
        let previous = session.active;

        let Some(chosen) = force_cs.or_else(|| session.best_eligible()) else {
            info!(session = session_id, "no collector available");
            self.sessions[index].active = None;
            self.emit(ExporterEvent::AllServersDisconnected {
                session: session_id,
            });
            return;
        };

        if previous == Some(chosen) && !force_negotiate {
            trace!(session = session_id, collector = %chosen, "active collector unchanged");
            return;
        }
        if previous.is_some_and(|old| old != chosen) {
            self.stop_active(
                index,
                SessionStopReason::HandingOff,
                "switching collector",
                CsState::Ready,
                now,
            );
        }
        if previous != Some(chosen) {
            self.sessions[index].sync_needed = true;
        }

        let key = CsKey {
            session: index,
            collector: chosen,
        };
        let Some((state, templates_sent)) = self.sessions[index]
            .path(chosen)
            .map(|p| (p.state, p.templates_sent))
        else {
            return;
        };
        debug!(session = session_id, collector = %chosen, ?state, force_negotiate, "collector selected");
        match state {
            CsState::Active => {
                self.stop_active(
                    index,
                    SessionStopReason::Renegotiation,
                    "renegotiation",
                    CsState::Ready,
                    now,
                );
                self.send_template_data(key, now);
            }
            CsState::Ready if force_negotiate => {
                self.send_template_data(key, now);
            }
            CsState::Ready => self.activate(key, now),
            CsState::Initiation => {
                if force_negotiate || !templates_sent {
                    self.send_template_data(key, now);
                }
            }
            CsState::Disconnected => {
                debug!(session = session_id, collector = %chosen, "selected collector has no flow");
            }
        }
    }

    /// Send SESSION_STOP to the active path of the session at `index` and
    /// leave the session without an active path
    pub(crate) fn stop_active(
        &mut self,
        index: usize,
        reason: SessionStopReason,
        reason_info: &str,
        next_state: CsState,
        now: Instant,
    ) {
        let Some(collector) = self.release_active(index, next_state) else {
            return;
        };
        let session_id = self.sessions[index].id;
        if let Some(conn) = self.live_conn(collector) {
            self.transport.reset(conn);
            self.send_message(
                conn,
                session_id,
                &Message::SessionStop {
                    reason,
                    reason_info: reason_info.to_string(),
                },
                now,
            );
        }
        info!(session = session_id, %collector, ?reason, "session stopped on collector");
    }

    /// Clear the active path of the session at `index` without telling the
    /// collector
    fn release_active(&mut self, index: usize, next_state: CsState) -> Option<CollectorId> {
        let session = &mut self.sessions[index];
        let collector = session.active.take()?;
        session.sync_needed = true;
        if let Some(path) = session.path_mut(collector) {
            if path.state == CsState::Active {
                path.state = next_state;
            }
            if next_state == CsState::Disconnected {
                path.templates_sent = false;
            }
        }
        self.timers.cancel(TimerKind::WindowSize(CsKey {
            session: index,
            collector,
        }));
        Some(collector)
    }

    /// Make a READY path the active path: SESSION_START, then flush
    fn activate(&mut self, key: CsKey, now: Instant) {
        let session = &self.sessions[key.session];
        if !session.running {
            debug!(session = session.id, collector = %key.collector, "session not running, path stays ready");
            return;
        }
        let Some(conn) = self.live_conn(key.collector) else {
            return;
        };
        let session_id = session.id;

        self.transport.reset(conn);
        let start = self.session_start(key);
        let first = start.first_record_sequence_number;
        if !self.send_message(conn, session_id, &Message::SessionStart(start), now) {
            return;
        }

        let session = &mut self.sessions[key.session];
        if let Some(path) = session.path_mut(key.collector) {
            path.state = CsState::Active;
        }
        session.active = Some(key.collector);
        session.stats.switches += 1;
        info!(session = session_id, collector = %key.collector, first_dsn = first, "collector active");
        self.emit(ExporterEvent::SessionActive {
            session: session_id,
            collector: key.collector,
        });
        self.flush(key.session, now);
    }

    /// Build SESSION_START; a pending resynchronisation rolls the queue back
    /// so unacknowledged records are resent
    fn session_start(&mut self, key: CsKey) -> SessionStart {
        let ack_time_interval = self.config.ack_time_interval.as_secs() as u32;
        let ack_sequence_interval = self.config.ack_sequence_interval;
        let session = &mut self.sessions[key.session];

        let lowest = session.paths.iter().map(|p| p.priority).min();
        let primary = session
            .path(key.collector)
            .is_some_and(|p| Some(p.priority) == lowest);

        if std::mem::take(&mut session.sync_needed) {
            session.queue.rollback();
        }
        SessionStart {
            exporter_boot_time: boot_time(),
            first_record_sequence_number: session
                .queue
                .oldest_unacknowledged()
                .unwrap_or(session.next_dsn),
            dropped_record_count: session.stats.records_lost,
            primary,
            ack_time_interval,
            ack_sequence_interval,
            document_id: session.document_id,
        }
    }

    /// Announce the current templates on a path and wait for its ack
    pub(crate) fn send_template_data(&mut self, key: CsKey, now: Instant) -> bool {
        let Some(conn) = self.live_conn(key.collector) else {
            return false;
        };
        let session = &self.sessions[key.session];
        let session_id = session.id;
        let message = Message::TemplateData(session.context.to_template_set());
        if !self.send_message(conn, session_id, &message, now) {
            return false;
        }
        if let Some(path) = self.sessions[key.session].path_mut(key.collector) {
            path.state = CsState::Initiation;
            path.templates_sent = true;
        }
        self.timers.arm(
            TimerKind::TemplateAck(key),
            now + self.config.template_ack_timeout,
        );
        debug!(session = session_id, collector = %key.collector, "TEMPLATE_DATA sent");
        true
    }

    pub(crate) fn handle_flow_start(&mut self, conn: ConnId, key: CsKey, now: Instant) {
        let session = &self.sessions[key.session];
        let session_id = session.id;
        if session.path_state(key.collector) != Some(CsState::Disconnected) {
            warn!(%conn, session = session_id, "FLOW_START on a started flow");
            self.send_error(
                conn,
                session_id,
                ErrorCode::MessageInvalidForState,
                "flow already started".to_string(),
                now,
            );
            return;
        }
        if !self.hooks.flow_start(session_id, key.collector) {
            info!(%conn, session = session_id, "flow start refused by application");
            self.send_error(
                conn,
                session_id,
                ErrorCode::MessageInvalidForState,
                "flow start refused".to_string(),
                now,
            );
            return;
        }

        let session = &mut self.sessions[key.session];
        if let Some(path) = session.path_mut(key.collector) {
            path.state = CsState::Initiation;
            path.templates_sent = false;
        }
        info!(session = session_id, collector = %key.collector, "flow started");

        let wait = self.config.best_collector_wait;
        if session.active.is_none() && !wait.is_zero() {
            let timer = TimerKind::BestCollectorWait(key.session);
            if !self.timers.is_armed(timer) {
                debug!(session = session_id, ?wait, "waiting for more collectors");
                self.timers.arm(timer, now + wait);
            }
        } else {
            self.send_template_data(key, now);
        }
    }

    pub(crate) fn handle_flow_stop(
        &mut self,
        key: CsKey,
        reason_code: u16,
        reason_info: &str,
        now: Instant,
    ) {
        let session = &self.sessions[key.session];
        let session_id = session.id;
        if matches!(session.path_state(key.collector), None | Some(CsState::Disconnected)) {
            debug!(session = session_id, collector = %key.collector, "FLOW_STOP without a flow ignored");
            return;
        }
        info!(session = session_id, collector = %key.collector, reason_code, reason_info, "flow stopped");

        let was_active = session.active == Some(key.collector);
        if was_active {
            self.release_active(key.session, CsState::Disconnected);
        }
        self.timers.cancel(TimerKind::TemplateAck(key));
        if let Some(path) = self.sessions[key.session].path_mut(key.collector) {
            path.state = CsState::Disconnected;
            path.templates_sent = false;
        }
        if self.sessions[key.session].active.is_none() {
            self.select_collector(key.session, false, None, now);
        }
    }

    pub(crate) fn handle_final_template_ack(&mut self, conn: ConnId, key: CsKey, now: Instant) {
        let session = &self.sessions[key.session];
        let session_id = session.id;
        let Some(path) = session.path(key.collector) else {
            return;
        };
        if path.state != CsState::Initiation {
            self.protocol_violation(
                conn,
                session_id,
                ErrorCode::MessageInvalidForState,
                "FINAL_TEMPLATE_DATA_ACK outside template initiation".to_string(),
                now,
            );
            return;
        }
        let priority = path.priority;
        let best = session
            .paths
            .iter()
            .filter(|p| p.collector != key.collector)
            .filter(|p| matches!(p.state, CsState::Ready | CsState::Active))
            .all(|p| priority < p.priority);
        let has_active = session.active.is_some();

        self.timers.cancel(TimerKind::TemplateAck(key));
        if let Some(path) = self.sessions[key.session].path_mut(key.collector) {
            path.state = CsState::Ready;
        }
        debug!(session = session_id, collector = %key.collector, best, "templates acknowledged");

        if best {
            self.select_collector(key.session, false, Some(key.collector), now);
        } else if !has_active {
            self.select_collector(key.session, false, None, now);
        }
    }

    pub(crate) fn best_collector_wait_expired(&mut self, index: usize, now: Instant) {
        let Some(session) = self.sessions.get(index) else {
            return;
        };
        let pending: Vec<CollectorId> = session
            .paths
            .iter()
            .filter(|p| p.state == CsState::Initiation && !p.templates_sent)
            .map(|p| p.collector)
            .collect();
        debug!(session = session.id, candidates = pending.len(), "collector wait over");
        for collector in pending {
            self.send_template_data(
                CsKey {
                    session: index,
                    collector,
                },
                now,
            );
        }
    }

    pub(crate) fn template_ack_expired(&mut self, key: CsKey, now: Instant) {
        let session = &self.sessions[key.session];
        let session_id = session.id;
        if session.path_state(key.collector) != Some(CsState::Initiation) {
            return;
        }
        warn!(session = session_id, collector = %key.collector, "FINAL_TEMPLATE_DATA_ACK overdue");
        if let Some(conn) = self.live_conn(key.collector) {
            self.send_error(
                conn,
                session_id,
                ErrorCode::TemplateDataAckExpired,
                "template data not acknowledged".to_string(),
                now,
            );
        }
        if let Some(path) = self.sessions[key.session].path_mut(key.collector) {
            path.state = CsState::Disconnected;
            path.templates_sent = false;
        }
        if self.sessions[key.session].active.is_none() {
            self.select_collector(key.session, false, None, now);
        }
    }
}
