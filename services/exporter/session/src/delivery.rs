//! Record submission, windowed flushing and DATA_ACK processing.

use bytes::Bytes;
use ipdr_storage::QueuedRecord;
use ipdr_wire::{DataFlags, DataRecord, ErrorCode, Message, SessionStopReason};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::error::ExporterError;
use crate::events::ExporterEvent;
use crate::exporter::Exporter;
use crate::model::{CsKey, CsState, TemplateHandle};
use crate::timer::TimerKind;
use crate::transport::Transport;

impl<T: Transport> Exporter<T> {
    /// Queue one record for `session_id` and send it if the window allows.
    ///
    /// Returns the sequence number assigned to the record. The sequence
    /// number advances even when the queue refuses the record.
    pub fn send_data(
        &mut self,
        session_id: u8,
        handle: TemplateHandle,
        payload: Bytes,
        now: Instant,
    ) -> Result<u64, ExporterError> {
        if self.shutting_down {
            return Err(ExporterError::Shutdown);
        }
        let index = self
            .session_index(session_id)
            .ok_or(ExporterError::UnknownSession(session_id))?;
        let session = &mut self.sessions[index];
        if !session.running {
            return Err(ExporterError::SessionNotRunning(session_id));
        }
        let stale = ExporterError::StaleTemplate {
            config_id: handle.config_id,
            template_id: handle.template_id,
        };
        if handle.config_id != session.context.config_id {
            return Err(stale);
        }
        let template = session.context.template(handle.template_id).ok_or(stale)?;
        if !template.has_enabled_keys() {
            return Err(ExporterError::TemplateDisabled(handle.template_id));
        }

        let dsn = session.next_dsn;
        session.next_dsn += 1;
        let record = QueuedRecord {
            dsn,
            template_id: handle.template_id,
            config_id: handle.config_id,
            payload,
            duplicate: false,
        };
        if let Err(error) = session.queue.enqueue(record) {
            self.record_lost(index, dsn, &error);
            return Err(error.into());
        }
        session.stats.records_enqueued += 1;
        trace!(session = session_id, dsn, "record queued");

        self.flush(index, now);
        self.finish(now);
        Ok(dsn)
    }

    /// Send queued records on the active path while the window has room
    pub(crate) fn flush(&mut self, index: usize, now: Instant) {
        let Some(collector) = self.sessions[index].active else {
            return;
        };
        let Some(conn) = self.live_conn(collector) else {
            return;
        };
        let window = self.config.window_size.max(1);

        loop {
            let session = &mut self.sessions[index];
            if session.queue.unacknowledged() >= window {
                break;
            }
            let Some(record) = session.queue.next_unsent() else {
                break;
            };
            let session_id = session.id;
            let duplicate = record.duplicate;
            let message = Message::Data(DataRecord {
                template_id: record.template_id,
                config_id: record.config_id,
                flags: if duplicate {
                    DataFlags::DUPLICATE
                } else {
                    DataFlags::empty()
                },
                sequence_num: record.dsn,
                record: record.payload,
            });
            if !self.send_message(conn, session_id, &message, now) {
                break;
            }
            let stats = &mut self.sessions[index].stats;
            stats.records_sent += 1;
            if duplicate {
                stats.retransmitted += 1;
            }
        }

        let key = CsKey {
            session: index,
            collector,
        };
        let timer = TimerKind::WindowSize(key);
        if self.sessions[index].queue.unacknowledged() > 0 && !self.timers.is_armed(timer) {
            self.timers.arm(timer, now + self.config.window_timeout);
        }
    }

    /// DATA_ACK from `key.collector`. A better standby path acknowledging
    /// records becomes the active path and the acknowledgement is applied
    /// to it once. The active path may not acknowledge records it was never
    /// sent.
    pub(crate) fn handle_data_ack(
        &mut self,
        key: CsKey,
        config_id: u16,
        dsn: u64,
        now: Instant,
        redelivered: bool,
    ) {
        let session = &self.sessions[key.session];
        let session_id = session.id;
        if config_id != session.context.config_id {
            debug!(session = session_id, config_id, dsn, "DATA_ACK for old configuration ignored");
            return;
        }

        if session.active == Some(key.collector) {
            let unsent = session.queue.next_unsent_dsn().unwrap_or(session.next_dsn);
            if dsn >= unsent && !redelivered {
                if let Some(conn) = self.live_conn(key.collector) {
                    self.protocol_violation(
                        conn,
                        session_id,
                        ErrorCode::MessageInvalidForState,
                        format!("DATA_ACK {} for a record not sent yet", dsn),
                        now,
                    );
                }
                return;
            }

            let session = &mut self.sessions[key.session];
            let removed = session.queue.acknowledge(dsn);
            session.stats.records_acked += removed as u64;
            let outstanding = session.queue.outstanding();
            let unacknowledged = session.queue.unacknowledged();
            trace!(session = session_id, dsn, removed, outstanding, unacknowledged, "DATA_ACK");

            let timer = TimerKind::WindowSize(key);
            if outstanding == 0 && unacknowledged == 0 {
                self.timers.cancel(timer);
                self.emit(ExporterEvent::QueueEmpty {
                    session: session_id,
                });
            } else if unacknowledged > 0 {
                self.timers.arm(timer, now + self.config.window_timeout);
            } else {
                self.timers.cancel(timer);
            }
            self.flush(key.session, now);
            return;
        }

        let Some(path) = session.path(key.collector) else {
            return;
        };
        let better = path.state == CsState::Ready
            && match session.active.and_then(|active| session.path(active)) {
                Some(active) => path.priority < active.priority,
                None => true,
            };
        if !better || redelivered {
            debug!(session = session_id, collector = %key.collector, dsn, "DATA_ACK from standby collector discarded");
            return;
        }

        info!(session = session_id, collector = %key.collector, "acknowledgement from better collector, switching");
        self.select_collector(key.session, false, Some(key.collector), now);
        if self.sessions[key.session].active == Some(key.collector) {
            self.handle_data_ack(key, config_id, dsn, now, true);
        }
    }

    pub(crate) fn window_expired(&mut self, key: CsKey, now: Instant) {
        let Some(session) = self.sessions.get(key.session) else {
            return;
        };
        if session.active != Some(key.collector) {
            return;
        }
        warn!(
            session = session.id,
            collector = %key.collector,
            unacknowledged = session.queue.unacknowledged(),
            "acknowledgement window expired"
        );
        self.stop_active(
            key.session,
            SessionStopReason::Congestion,
            "acknowledgement window expired",
            CsState::Disconnected,
            now,
        );
        // The collector is redialled and has to start its flow again
        if let Some(conn) = self.live_conn(key.collector) {
            self.schedule_drop(conn, "acknowledgement window expired".to_string());
        }
        self.select_collector(key.session, false, None, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExporterConfig;
    use crate::model::{CollectorId, ConnId};
    use crate::testing::*;
    use ipdr_storage::QueueMode;
    use ipdr_wire::ErrorReport;
    use std::time::Duration;

    const A: CollectorId = CollectorId(0);
    const B: CollectorId = CollectorId(1);

    fn ack(config_id: u16, sequence_num: u64) -> Message {
        Message::DataAck {
            config_id,
            sequence_num,
        }
    }

    fn sequence_numbers(messages: &[Message]) -> Vec<u64> {
        messages
            .iter()
            .filter_map(|m| match m {
                Message::Data(record) => Some(record.sequence_num),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let (mut exporter, _events) =
            exporter(ExporterConfig::default(), vec![session_config(1, &[("a", 1)], false)]);
        let now = Instant::now();
        let handle = exporter.template_handle(1, 1).unwrap();

        let mut last = None;
        for i in 0..50u8 {
            let dsn = exporter.send_data(1, handle, Bytes::from(vec![i]), now).unwrap();
            assert!(last.map_or(true, |prev| dsn > prev));
            last = Some(dsn);
        }
        assert_eq!(exporter.session(1).unwrap().stats.records_enqueued, 50);
    }

    #[test]
    fn test_send_data_validation() {
        let (mut exporter, _events) =
            exporter(ExporterConfig::default(), vec![session_config(1, &[("a", 1)], false)]);
        let now = Instant::now();
        let handle = exporter.template_handle(1, 1).unwrap();

        assert_eq!(
            exporter.send_data(7, handle, Bytes::new(), now),
            Err(ExporterError::UnknownSession(7))
        );
        let unknown = TemplateHandle {
            config_id: 0,
            template_id: 99,
        };
        assert!(matches!(
            exporter.send_data(1, unknown, Bytes::new(), now),
            Err(ExporterError::StaleTemplate { .. })
        ));

        exporter.stop_session(1, now).unwrap();
        assert_eq!(
            exporter.send_data(1, handle, Bytes::new(), now),
            Err(ExporterError::SessionNotRunning(1))
        );
    }

    #[test]
    fn test_queue_full_reports_record_lost() {
        let config = ExporterConfig {
            queue: QueueMode::InMemory { capacity: 2 },
            ..ExporterConfig::default()
        };
        let (mut exporter, mut events) =
            exporter(config, vec![session_config(1, &[("a", 1)], false)]);
        let now = Instant::now();
        let handle = exporter.template_handle(1, 1).unwrap();

        assert_eq!(exporter.send_data(1, handle, Bytes::new(), now), Ok(0));
        assert_eq!(exporter.send_data(1, handle, Bytes::new(), now), Ok(1));
        assert!(matches!(
            exporter.send_data(1, handle, Bytes::new(), now),
            Err(ExporterError::RecordLost(_))
        ));
        assert!(drain(&mut events).contains(&ExporterEvent::RecordLost { session: 1, dsn: 2 }));

        // The lost record still consumed its sequence number
        start_flow(&mut exporter, ConnId(1), IP_A, 1, now);
        let sent = exporter.transport_mut().take_messages(ConnId(1));
        let start = sent.iter().find_map(|m| match m {
            Message::SessionStart(start) => Some(start.clone()),
            _ => None,
        });
        let start = start.unwrap();
        assert_eq!(start.dropped_record_count, 1);
        assert_eq!(start.first_record_sequence_number, 0);
        assert_eq!(sequence_numbers(&sent), vec![0, 1]);

        exporter.handle_message(ConnId(1), 1, ack(0, 1), now);
        assert_eq!(exporter.send_data(1, handle, Bytes::new(), now), Ok(3));
    }

    #[test]
    fn test_window_limits_in_flight_records() {
        let config = ExporterConfig {
            window_size: 3,
            ..ExporterConfig::default()
        };
        let (mut exporter, mut events) =
            exporter(config, vec![session_config(1, &[("a", 1)], false)]);
        let now = Instant::now();
        start_flow(&mut exporter, ConnId(1), IP_A, 1, now);
        exporter.transport_mut().take(ConnId(1));
        let handle = exporter.template_handle(1, 1).unwrap();

        for _ in 0..5 {
            exporter.send_data(1, handle, Bytes::from_static(b"r"), now).unwrap();
        }
        let sent = exporter.transport_mut().take_messages(ConnId(1));
        assert_eq!(sequence_numbers(&sent), vec![0, 1, 2]);
        let key = CsKey {
            session: 0,
            collector: A,
        };
        assert!(exporter.timers.is_armed(TimerKind::WindowSize(key)));

        exporter.handle_message(ConnId(1), 1, ack(0, 1), now);
        let sent = exporter.transport_mut().take_messages(ConnId(1));
        assert_eq!(sequence_numbers(&sent), vec![3, 4]);

        exporter.handle_message(ConnId(1), 1, ack(0, 4), now);
        assert!(!exporter.timers.is_armed(TimerKind::WindowSize(key)));
        assert!(drain(&mut events).contains(&ExporterEvent::QueueEmpty { session: 1 }));
        assert_eq!(exporter.session(1).unwrap().stats.records_acked, 5);
    }

    #[test]
    fn test_duplicate_ack_is_idempotent() {
        let (mut exporter, _events) =
            exporter(ExporterConfig::default(), vec![session_config(1, &[("a", 1)], false)]);
        let now = Instant::now();
        start_flow(&mut exporter, ConnId(1), IP_A, 1, now);
        let handle = exporter.template_handle(1, 1).unwrap();
        for _ in 0..4 {
            exporter.send_data(1, handle, Bytes::from_static(b"r"), now).unwrap();
        }

        exporter.handle_message(ConnId(1), 1, ack(0, 1), now);
        let after_first = exporter.session(1).unwrap().queue.unacknowledged();
        exporter.handle_message(ConnId(1), 1, ack(0, 1), now);
        let session = exporter.session(1).unwrap();
        assert_eq!(after_first, 2);
        assert_eq!(session.queue.unacknowledged(), 2);
        assert_eq!(session.stats.records_acked, 2);
    }

    #[test]
    fn test_stale_ack_is_ignored() {
        let (mut exporter, _events) =
            exporter(ExporterConfig::default(), vec![session_config(1, &[("a", 1)], false)]);
        let now = Instant::now();
        start_flow(&mut exporter, ConnId(1), IP_A, 1, now);
        let handle = exporter.template_handle(1, 1).unwrap();
        exporter.send_data(1, handle, Bytes::from_static(b"r"), now).unwrap();

        exporter.handle_message(ConnId(1), 1, ack(5, 0), now);
        assert_eq!(exporter.session(1).unwrap().queue.unacknowledged(), 1);
    }

    #[test]
    fn test_ack_from_standby_promotes_it_when_no_path_is_active() {
        let (mut exporter, mut events) = exporter(
            ExporterConfig::default(),
            vec![session_config(1, &[("a", 1), ("b", 5)], true)],
        );
        let now = Instant::now();
        start_flow(&mut exporter, ConnId(1), IP_A, 1, now);
        start_flow(&mut exporter, ConnId(2), IP_B, 1, now);
        let handle = exporter.template_handle(1, 1).unwrap();
        for _ in 0..3 {
            exporter.send_data(1, handle, Bytes::from_static(b"r"), now).unwrap();
        }
        exporter.transport_mut().take(ConnId(1));
        exporter.transport_mut().take(ConnId(2));

        // A renegotiates, which leaves the session without an active path
        exporter.handle_message(ConnId(1), 1, Message::StartNegotiation, now);
        let session = exporter.session(1).unwrap();
        assert_eq!(session.active, None);
        assert_eq!(session.path_state(A), Some(CsState::Initiation));
        assert_eq!(session.path_state(B), Some(CsState::Ready));
        exporter.transport_mut().take(ConnId(1));
        drain(&mut events);

        exporter.handle_message(ConnId(2), 1, ack(0, 1), now);

        let to_b = exporter.transport_mut().take_messages(ConnId(2));
        assert!(matches!(
            to_b.first(),
            Some(Message::SessionStart(start)) if start.first_record_sequence_number == 0
        ));
        assert_eq!(sequence_numbers(&to_b), vec![0, 1, 2]);
        assert!(!to_b.iter().any(|m| matches!(m, Message::Error(_))));
        assert!(exporter.transport_mut().take_messages(ConnId(1)).is_empty());

        let session = exporter.session(1).unwrap();
        assert_eq!(session.active, Some(B));
        assert_eq!(session.queue.unacknowledged(), 1);
        assert_eq!(session.queue.oldest_unacknowledged(), Some(2));
        assert_eq!(session.stats.records_acked, 2);
        assert!(drain(&mut events).contains(&ExporterEvent::SessionActive {
            session: 1,
            collector: B
        }));

        // A finishes renegotiating and takes the session back
        exporter.handle_message(ConnId(1), 1, Message::FinalTemplateDataAck, now);
        assert!(matches!(
            exporter.transport_mut().take_messages(ConnId(2)).as_slice(),
            [Message::SessionStop {
                reason: SessionStopReason::HandingOff,
                ..
            }]
        ));
        let to_a = exporter.transport_mut().take_messages(ConnId(1));
        assert!(matches!(to_a.first(), Some(Message::SessionStart(_))));
        assert_eq!(sequence_numbers(&to_a), vec![2]);
        assert_eq!(exporter.session(1).unwrap().active, Some(A));
    }

    #[test]
    fn test_ack_for_unsent_record_is_rejected() {
        let config = ExporterConfig {
            window_size: 2,
            ..ExporterConfig::default()
        };
        let (mut exporter, _events) =
            exporter(config, vec![session_config(1, &[("a", 1)], false)]);
        let now = Instant::now();
        start_flow(&mut exporter, ConnId(1), IP_A, 1, now);
        let handle = exporter.template_handle(1, 1).unwrap();
        for _ in 0..4 {
            exporter.send_data(1, handle, Bytes::from_static(b"r"), now).unwrap();
        }
        exporter.transport_mut().take(ConnId(1));

        // Records 2 and 3 are still waiting for window room
        exporter.handle_message(ConnId(1), 1, ack(0, 3), now);
        assert!(matches!(
            exporter.transport_mut().take_messages(ConnId(1)).as_slice(),
            [Message::Error(ErrorReport {
                code: ErrorCode::MessageInvalidForState,
                ..
            })]
        ));
        let session = exporter.session(1).unwrap();
        assert_eq!(session.queue.unacknowledged(), 2);
        assert_eq!(session.queue.outstanding(), 2);
        assert_eq!(session.stats.records_acked, 0);
        assert_eq!(exporter.connection(ConnId(1)).unwrap().invalid_state_count, 1);

        // Never assigned at all
        exporter.handle_message(ConnId(1), 1, ack(0, 40), now);
        assert_eq!(exporter.session(1).unwrap().queue.unacknowledged(), 2);

        exporter.handle_message(ConnId(1), 1, ack(0, 1), now);
        let sent = exporter.transport_mut().take_messages(ConnId(1));
        assert_eq!(sequence_numbers(&sent), vec![2, 3]);
        assert_eq!(exporter.session(1).unwrap().stats.records_acked, 2);
    }

    #[test]
    fn test_queue_empty_follows_counts() {
        let (mut exporter, mut events) =
            exporter(ExporterConfig::default(), vec![session_config(1, &[("a", 1)], false)]);
        let now = Instant::now();
        start_flow(&mut exporter, ConnId(1), IP_A, 1, now);
        let handle = exporter.template_handle(1, 1).unwrap();
        exporter.send_data(1, handle, Bytes::from_static(b"r"), now).unwrap();
        exporter.send_data(1, handle, Bytes::from_static(b"r"), now).unwrap();

        exporter.handle_message(ConnId(1), 1, ack(0, 0), now);
        assert!(!drain(&mut events).contains(&ExporterEvent::QueueEmpty { session: 1 }));

        exporter.handle_message(ConnId(1), 1, ack(0, 1), now);
        assert!(drain(&mut events).contains(&ExporterEvent::QueueEmpty { session: 1 }));

        // A repeated acknowledgement removes nothing but the queue is still empty
        exporter.handle_message(ConnId(1), 1, ack(0, 1), now);
        assert_eq!(
            drain(&mut events),
            vec![ExporterEvent::QueueEmpty { session: 1 }]
        );
    }

    #[test]
    fn test_ack_from_worse_standby_is_discarded() {
        let (mut exporter, _events) = exporter(
            ExporterConfig::default(),
            vec![session_config(1, &[("a", 1), ("b", 5)], false)],
        );
        let now = Instant::now();
        start_flow(&mut exporter, ConnId(1), IP_A, 1, now);
        start_flow(&mut exporter, ConnId(2), IP_B, 1, now);
        let handle = exporter.template_handle(1, 1).unwrap();
        exporter.send_data(1, handle, Bytes::from_static(b"r"), now).unwrap();

        exporter.handle_message(ConnId(2), 1, ack(0, 0), now);
        let session = exporter.session(1).unwrap();
        assert_eq!(session.active, Some(A));
        assert_eq!(session.queue.unacknowledged(), 1);
    }

    #[test]
    fn test_window_timeout_fails_over() {
        let config = ExporterConfig {
            window_timeout: Duration::from_secs(5),
            ..ExporterConfig::default()
        };
        let (mut exporter, _events) =
            exporter(config, vec![session_config(1, &[("a", 1), ("b", 5)], false)]);
        let now = Instant::now();
        start_flow(&mut exporter, ConnId(1), IP_A, 1, now);
        start_flow(&mut exporter, ConnId(2), IP_B, 1, now);
        let handle = exporter.template_handle(1, 1).unwrap();
        exporter.send_data(1, handle, Bytes::from_static(b"r"), now).unwrap();
        exporter.transport_mut().take(ConnId(1));
        exporter.transport_mut().take(ConnId(2));

        exporter.poll_timers(now + Duration::from_secs(6));

        assert!(matches!(
            exporter.transport_mut().take_messages(ConnId(1)).as_slice(),
            [Message::SessionStop {
                reason: SessionStopReason::Congestion,
                ..
            }]
        ));
        let to_b = exporter.transport_mut().take_messages(ConnId(2));
        assert!(matches!(to_b.first(), Some(Message::SessionStart(_))));
        assert_eq!(sequence_numbers(&to_b), vec![0]);
        let session = exporter.session(1).unwrap();
        assert_eq!(session.active, Some(B));
        assert_eq!(session.path_state(A), Some(CsState::Disconnected));
        assert_eq!(session.stats.retransmitted, 1);
        assert!(exporter.transport().is_disconnected(ConnId(1)));
        assert!(exporter.needs_dial(A));
    }

    #[test]
    fn test_window_timeout_with_single_collector_resumes_after_reconnect() {
        let config = ExporterConfig {
            window_timeout: Duration::from_secs(5),
            ..ExporterConfig::default()
        };
        let (mut exporter, mut events) =
            exporter(config, vec![session_config(1, &[("a", 1)], false)]);
        let now = Instant::now();
        start_flow(&mut exporter, ConnId(1), IP_A, 1, now);
        let handle = exporter.template_handle(1, 1).unwrap();
        exporter.send_data(1, handle, Bytes::from_static(b"r"), now).unwrap();
        exporter.transport_mut().take(ConnId(1));
        drain(&mut events);

        let later = now + Duration::from_secs(6);
        exporter.poll_timers(later);

        assert!(matches!(
            exporter.transport_mut().take_messages(ConnId(1)).as_slice(),
            [Message::SessionStop {
                reason: SessionStopReason::Congestion,
                ..
            }]
        ));
        assert!(exporter.transport().is_disconnected(ConnId(1)));
        assert!(exporter.connection(ConnId(1)).is_none());
        assert!(exporter.needs_dial(A));
        let session = exporter.session(1).unwrap();
        assert_eq!(session.active, None);
        assert_eq!(session.queue.outstanding() + session.queue.unacknowledged(), 1);
        let fired = drain(&mut events);
        assert!(fired.contains(&ExporterEvent::AllServersDisconnected { session: 1 }));
        assert!(fired
            .iter()
            .any(|e| matches!(e, ExporterEvent::ConnectionDown { conn: ConnId(1), .. })));

        // The collector comes back and streaming picks up where it stopped
        start_flow(&mut exporter, ConnId(2), IP_A, 1, later);
        let sent = exporter.transport_mut().take_messages(ConnId(2));
        assert!(matches!(
            sent.iter().find(|m| matches!(m, Message::SessionStart(_))),
            Some(Message::SessionStart(start)) if start.first_record_sequence_number == 0
        ));
        let resent: Vec<&DataRecord> = sent
            .iter()
            .filter_map(|m| match m {
                Message::Data(record) => Some(record),
                _ => None,
            })
            .collect();
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0].sequence_num, 0);
        assert!(resent[0].flags.contains(DataFlags::DUPLICATE));

        exporter.handle_message(ConnId(2), 1, ack(0, 0), later);
        assert_eq!(exporter.send_data(1, handle, Bytes::from_static(b"r"), later), Ok(1));
        let sent = exporter.transport_mut().take_messages(ConnId(2));
        assert_eq!(sequence_numbers(&sent), vec![1]);
        assert_eq!(exporter.session(1).unwrap().active, Some(A));
    }

    #[test]
    fn test_shutdown_stops_everything() {
        let (mut exporter, _events) =
            exporter(ExporterConfig::default(), vec![session_config(1, &[("a", 1)], false)]);
        let now = Instant::now();
        start_flow(&mut exporter, ConnId(1), IP_A, 1, now);
        exporter.transport_mut().take(ConnId(1));
        let handle = exporter.template_handle(1, 1).unwrap();

        exporter.shutdown(now);
        assert_eq!(
            exporter.transport_mut().take_messages(ConnId(1)),
            vec![
                Message::SessionStop {
                    reason: SessionStopReason::ExporterTerminating,
                    reason_info: "exporter terminating".to_string(),
                },
                Message::Disconnect,
            ]
        );
        assert!(exporter.connection(ConnId(1)).is_none());
        assert_eq!(
            exporter.send_data(1, handle, Bytes::new(), now),
            Err(ExporterError::Shutdown)
        );
        assert_eq!(exporter.next_deadline(), None);
    }
}
