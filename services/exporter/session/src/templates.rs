//! Template negotiation and the GET_SESSIONS / GET_TEMPLATES queries.

use ipdr_wire::{
    Capabilities, ErrorCode, Message, SessionBlock, SessionStopReason, Template, TemplateSet,
};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ExporterError;
use crate::events::ExporterEvent;
use crate::exporter::Exporter;
use crate::model::{CollectorId, ConnId, CsKey, CsState, TransmissionContext};
use crate::transport::Transport;

/// Check a MODIFY_TEMPLATE request against `context`.
///
/// Every template and key must already exist with the same base type and
/// name; only the enabled flags may differ. Returns the updated templates
/// when at least one flag changed.
pub(crate) fn apply_modification(
    context: &TransmissionContext,
    request: &TemplateSet,
) -> Result<Option<Vec<Template>>, String> {
    if request.config_id != context.config_id {
        return Err(format!(
            "configuration {} is not the active configuration {}",
            request.config_id, context.config_id
        ));
    }

    let mut templates = context.templates.clone();
    let mut changed = false;
    for incoming in &request.templates {
        let current = templates
            .iter_mut()
            .find(|t| t.template_id == incoming.template_id)
            .ok_or_else(|| format!("unknown template {}", incoming.template_id))?;
        for key in &incoming.keys {
            let existing = current
                .keys
                .iter_mut()
                .find(|k| k.key_id == key.key_id)
                .ok_or_else(|| {
                    format!("unknown key {} in template {}", key.key_id, incoming.template_id)
                })?;
            if existing.base_type() != key.base_type() {
                return Err(format!(
                    "key {} of template {} has type {:#x}, expected base type {:#x}",
                    key.key_id,
                    incoming.template_id,
                    key.key_type_id,
                    existing.base_type()
                ));
            }
            if existing.name != key.name {
                return Err(format!(
                    "key {} of template {} is named {:?}, expected {:?}",
                    key.key_id, incoming.template_id, key.name, existing.name
                ));
            }
            if existing.enabled != key.enabled {
                existing.enabled = key.enabled;
                changed = true;
            }
        }
    }
    Ok(changed.then_some(templates))
}

impl<T: Transport> Exporter<T> {
    /// Replace the templates of `session_id` with a new configuration.
    ///
    /// Queued records belong to the old configuration and are dropped. The
    /// active collector receives SESSION_STOP and every path with a flow is
    /// sent the new templates. Returns the new configuration id.
    pub fn set_templates(
        &mut self,
        session_id: u8,
        templates: Vec<Template>,
        negotiable: bool,
        now: Instant,
    ) -> Result<u16, ExporterError> {
        if self.shutting_down {
            return Err(ExporterError::Shutdown);
        }
        let index = self
            .session_index(session_id)
            .ok_or(ExporterError::UnknownSession(session_id))?;

        self.stop_active(
            index,
            SessionStopReason::TemplateChanged,
            "templates changed",
            CsState::Ready,
            now,
        );
        self.discard_queue(index);
        let session = &mut self.sessions[index];
        let config_id = session.context.config_id.wrapping_add(1);
        session.context = TransmissionContext {
            config_id,
            templates,
            negotiable,
        };
        session.document_id = uuid::Uuid::new_v4().into_bytes();
        info!(session = session_id, config_id, "templates replaced");

        let paths: Vec<CollectorId> = session
            .paths
            .iter()
            .filter(|p| p.state.is_eligible())
            .map(|p| p.collector)
            .collect();
        for collector in paths {
            self.send_template_data(
                CsKey {
                    session: index,
                    collector,
                },
                now,
            );
        }
        self.emit(ExporterEvent::TemplatesChanged {
            session: session_id,
            config_id,
        });
        self.finish(now);
        Ok(config_id)
    }

    pub(crate) fn handle_modify_template(
        &mut self,
        conn: ConnId,
        key: CsKey,
        request: TemplateSet,
        now: Instant,
    ) {
        let session_id = self.sessions[key.session].id;
        let negotiated = self
            .connections
            .get(&conn)
            .is_some_and(|c| c.capabilities.contains(Capabilities::TEMPLATE_NEGOTIATION));
        if !negotiated {
            warn!(%conn, session = session_id, "MODIFY_TEMPLATE without template negotiation");
            self.send_error(
                conn,
                session_id,
                ErrorCode::MessageInvalidForCapabilities,
                "template negotiation not negotiated".to_string(),
                now,
            );
            return;
        }

        if self.sessions[key.session].path_state(key.collector) == Some(CsState::Disconnected) {
            self.protocol_violation(
                conn,
                session_id,
                ErrorCode::MessageInvalidForState,
                "MODIFY_TEMPLATE without a started flow".to_string(),
                now,
            );
            return;
        }

        let context = &self.sessions[key.session].context;
        if !context.negotiable {
            self.protocol_violation(
                conn,
                session_id,
                ErrorCode::MessageInvalidForState,
                "templates are not negotiable".to_string(),
                now,
            );
            return;
        }

        let templates = match apply_modification(context, &request) {
            Ok(Some(templates)) => templates,
            Ok(None) => {
                debug!(session = session_id, "MODIFY_TEMPLATE changed nothing");
                let reply = Message::ModifyTemplateResponse(context.to_template_set());
                self.send_message(conn, session_id, &reply, now);
                return;
            }
            Err(reason) => {
                warn!(%conn, session = session_id, %reason, "broken template");
                self.send_error(conn, session_id, ErrorCode::BrokenTemplate, reason, now);
                return;
            }
        };

        self.discard_queue(key.session);
        let session = &mut self.sessions[key.session];
        let config_id = session.context.config_id.wrapping_add(1);
        session.context = TransmissionContext {
            config_id,
            templates,
            negotiable: session.context.negotiable,
        };
        info!(session = session_id, collector = %key.collector, config_id, "templates modified by collector");
        self.hooks
            .templates_changed(session_id, &self.sessions[key.session].context);

        let reply = Message::ModifyTemplateResponse(self.sessions[key.session].context.to_template_set());
        self.send_message(conn, session_id, &reply, now);
        self.emit(ExporterEvent::TemplatesChanged {
            session: session_id,
            config_id,
        });

        let session = &self.sessions[key.session];
        let others: Vec<CollectorId> = session
            .paths
            .iter()
            .filter(|p| p.collector != key.collector && Some(p.collector) != session.active)
            .filter(|p| matches!(p.state, CsState::Initiation | CsState::Ready))
            .map(|p| p.collector)
            .collect();
        for collector in others {
            self.send_template_data(
                CsKey {
                    session: key.session,
                    collector,
                },
                now,
            );
        }
    }

    pub(crate) fn handle_start_negotiation(&mut self, conn: ConnId, key: CsKey, now: Instant) {
        let session = &self.sessions[key.session];
        let session_id = session.id;
        let negotiated = self
            .connections
            .get(&conn)
            .is_some_and(|c| c.capabilities.contains(Capabilities::TEMPLATE_NEGOTIATION));
        let has_flow = session
            .path_state(key.collector)
            .is_some_and(CsState::is_eligible);
        let allowed = negotiated
            && session.negotiable
            && has_flow
            && self.hooks.start_negotiation(session_id, key.collector);
        if !allowed {
            info!(%conn, session = session_id, negotiated, has_flow, "negotiation rejected");
            self.send_message(conn, session_id, &Message::StartNegotiationReject, now);
            return;
        }

        info!(session = session_id, collector = %key.collector, "negotiation started");
        let session = &mut self.sessions[key.session];
        session.context.negotiable = true;
        if session.active == Some(key.collector) {
            self.stop_active(
                key.session,
                SessionStopReason::Renegotiation,
                "renegotiation",
                CsState::Ready,
                now,
            );
        }
        self.send_template_data(key, now);
        if self.sessions[key.session].active.is_none() {
            self.select_collector(key.session, false, None, now);
        }
    }

    pub(crate) fn handle_get_templates(
        &mut self,
        conn: ConnId,
        key: CsKey,
        request_id: u16,
        now: Instant,
    ) {
        let session = &self.sessions[key.session];
        let session_id = session.id;
        let reply = Message::GetTemplatesResponse {
            request_id,
            config_id: session.context.config_id,
            templates: session.context.templates.clone(),
        };
        self.send_message(conn, session_id, &reply, now);
    }

    pub(crate) fn handle_get_sessions(
        &mut self,
        conn: ConnId,
        collector: CollectorId,
        request_id: u16,
        now: Instant,
    ) {
        let ack_time_interval = self.config.ack_time_interval.as_secs() as u32;
        let ack_sequence_interval = self.config.ack_sequence_interval;
        let sessions = self
            .sessions
            .iter()
            .filter(|s| s.path(collector).is_some())
            .map(|s| SessionBlock {
                session_id: s.id,
                name: s.name.clone(),
                description: s.description.clone(),
                ack_time_interval,
                ack_sequence_interval,
            })
            .collect();
        let reply = Message::GetSessionsResponse {
            request_id,
            sessions,
        };
        self.send_message(conn, 0, &reply, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExporterConfig;
    use crate::events::ApplicationHooks;
    use crate::testing::*;
    use crate::timer::TimerKind;
    use bytes::Bytes;
    use ipdr_wire::{ErrorReport, Key, TemplateFlags};
    use std::sync::{Arc, Mutex};

    const A: CollectorId = CollectorId(0);
    const B: CollectorId = CollectorId(1);

    fn modification(config_id: u16, template: Template) -> Message {
        Message::ModifyTemplate(TemplateSet {
            config_id,
            flags: TemplateFlags::NEGOTIABLE,
            templates: vec![template],
        })
    }

    fn context(negotiable: bool) -> TransmissionContext {
        TransmissionContext {
            config_id: 4,
            templates: templates(),
            negotiable,
        }
    }

    #[test]
    fn test_apply_modification_updates_enabled_flags() {
        let mut disabled = Key::new(0x122, 2, "RecCreationTime");
        disabled.enabled = false;
        let request = TemplateSet {
            config_id: 4,
            flags: TemplateFlags::NEGOTIABLE,
            templates: vec![Template::new(1, "DOCSIS", "CPE-Type").with_key(disabled)],
        };

        let updated = apply_modification(&context(true), &request).unwrap().unwrap();
        assert!(updated[0].keys[0].enabled);
        assert!(!updated[0].keys[1].enabled);
        assert_eq!(updated[1], templates()[1]);
    }

    #[test]
    fn test_apply_modification_accepts_derived_type() {
        // 0x122 and 0x22 share a base type
        let request = TemplateSet {
            config_id: 4,
            flags: TemplateFlags::empty(),
            templates: vec![Template::new(1, "DOCSIS", "CPE-Type").with_key(Key::new(0x22, 2, "RecCreationTime"))],
        };
        assert_eq!(apply_modification(&context(true), &request), Ok(None));
    }

    #[test]
    fn test_apply_modification_rejects_mismatches() {
        let wrong_type = TemplateSet {
            config_id: 4,
            flags: TemplateFlags::empty(),
            templates: vec![Template::new(2, "DOCSIS", "SAMIS-Type").with_key(Key::new(0x25, 3, "ServiceOctetsPassed"))],
        };
        assert!(apply_modification(&context(true), &wrong_type).is_err());

        let wrong_name = TemplateSet {
            config_id: 4,
            flags: TemplateFlags::empty(),
            templates: vec![Template::new(2, "DOCSIS", "SAMIS-Type").with_key(Key::new(0x21, 3, "Octets"))],
        };
        assert!(apply_modification(&context(true), &wrong_name).is_err());

        let unknown = TemplateSet {
            config_id: 4,
            flags: TemplateFlags::empty(),
            templates: vec![Template::new(9, "DOCSIS", "X")],
        };
        assert!(apply_modification(&context(true), &unknown).is_err());

        let stale = TemplateSet {
            config_id: 3,
            flags: TemplateFlags::empty(),
            templates: vec![],
        };
        assert!(apply_modification(&context(true), &stale).is_err());
    }

    #[test]
    fn test_modify_template_type_mismatch_is_broken_template() {
        let (mut exporter, _events) =
            exporter(ExporterConfig::default(), vec![session_config(1, &[("a", 1)], true)]);
        let now = Instant::now();
        connect(&mut exporter, ConnId(1), IP_A, now);
        exporter.handle_message(ConnId(1), 1, Message::FlowStart, now);
        exporter.transport_mut().take(ConnId(1));

        let broken = Template::new(1, "DOCSIS", "CPE-Type").with_key(Key::new(0x24, 1, "CmtsHostName"));
        exporter.handle_message(ConnId(1), 1, modification(0, broken), now);

        let sent = exporter.transport_mut().take_messages(ConnId(1));
        assert!(matches!(
            sent.as_slice(),
            [Message::Error(ErrorReport {
                code: ErrorCode::BrokenTemplate,
                ..
            })]
        ));
        let session = exporter.session(1).unwrap();
        assert_eq!(session.context.config_id, 0);
        assert_eq!(session.context.templates, templates());
    }

    #[test]
    fn test_modify_template_changes_context() {
        #[derive(Clone, Default)]
        struct Recorder(Arc<Mutex<Vec<u16>>>);
        impl ApplicationHooks for Recorder {
            fn templates_changed(&self, _session: u8, context: &TransmissionContext) {
                self.0.lock().unwrap().push(context.config_id);
            }
        }

        let hooks = Recorder::default();
        let (exporter, mut events) = exporter(
            ExporterConfig::default(),
            vec![session_config(1, &[("a", 1), ("b", 5)], true)],
        );
        let mut exporter = exporter.with_hooks(hooks.clone());
        let now = Instant::now();
        start_flow(&mut exporter, ConnId(2), IP_B, 1, now);
        let handle = exporter.template_handle(1, 2).unwrap();
        exporter.send_data(1, handle, Bytes::from_static(b"old"), now).unwrap();

        connect(&mut exporter, ConnId(3), IP_A, now);
        exporter.handle_message(ConnId(3), 1, Message::FlowStart, now);
        exporter.transport_mut().take(ConnId(2));
        exporter.transport_mut().take(ConnId(3));
        drain(&mut events);

        let mut key = Key::new(0x21, 3, "ServiceOctetsPassed");
        key.enabled = false;
        let request = Template::new(2, "DOCSIS", "SAMIS-Type").with_key(key);
        exporter.handle_message(ConnId(3), 1, modification(0, request), now);

        let sent = exporter.transport_mut().take_messages(ConnId(3));
        match sent.as_slice() {
            [Message::ModifyTemplateResponse(set)] => {
                assert_eq!(set.config_id, 1);
                assert!(!set.templates[1].has_enabled_keys());
            }
            other => panic!("unexpected messages {:?}", other),
        }
        let session = exporter.session(1).unwrap();
        assert_eq!(session.context.config_id, 1);
        assert_eq!(session.queue.outstanding() + session.queue.unacknowledged(), 0);
        assert_eq!(session.stats.records_lost, 1);
        assert_eq!(*hooks.0.lock().unwrap(), vec![1]);
        assert!(drain(&mut events).contains(&ExporterEvent::TemplatesChanged {
            session: 1,
            config_id: 1
        }));

        // Old handles are stale, the disabled template refuses records
        assert_eq!(
            exporter.send_data(1, handle, Bytes::from_static(b"x"), now),
            Err(ExporterError::StaleTemplate {
                config_id: 0,
                template_id: 2
            })
        );
        let handle = exporter.template_handle(1, 2).unwrap();
        assert_eq!(
            exporter.send_data(1, handle, Bytes::from_static(b"x"), now),
            Err(ExporterError::TemplateDisabled(2))
        );
    }

    #[test]
    fn test_modify_template_requires_negotiable_context() {
        let (mut exporter, _events) =
            exporter(ExporterConfig::default(), vec![session_config(1, &[("a", 1)], false)]);
        let now = Instant::now();
        connect(&mut exporter, ConnId(1), IP_A, now);

        let request = Template::new(1, "DOCSIS", "CPE-Type");
        exporter.handle_message(ConnId(1), 1, modification(0, request), now);
        let sent = exporter.transport_mut().take_messages(ConnId(1));
        assert!(matches!(
            sent.as_slice(),
            [Message::Error(ErrorReport {
                code: ErrorCode::MessageInvalidForState,
                ..
            })]
        ));
    }

    #[test]
    fn test_modify_template_requires_started_flow() {
        let (mut exporter, _events) =
            exporter(ExporterConfig::default(), vec![session_config(1, &[("a", 1)], true)]);
        let now = Instant::now();
        connect(&mut exporter, ConnId(1), IP_A, now);

        let mut key = Key::new(0x21, 3, "ServiceOctetsPassed");
        key.enabled = false;
        let request = Template::new(2, "DOCSIS", "SAMIS-Type").with_key(key);
        exporter.handle_message(ConnId(1), 1, modification(0, request), now);

        let sent = exporter.transport_mut().take_messages(ConnId(1));
        assert!(matches!(
            sent.as_slice(),
            [Message::Error(ErrorReport {
                code: ErrorCode::MessageInvalidForState,
                ..
            })]
        ));
        assert_eq!(exporter.connection(ConnId(1)).unwrap().invalid_state_count, 1);
        let session = exporter.session(1).unwrap();
        assert_eq!(session.context.config_id, 0);
        assert_eq!(session.context.templates, templates());
        assert_eq!(session.path_state(A), Some(CsState::Disconnected));
    }

    #[test]
    fn test_modify_template_requires_capability() {
        let (mut exporter, _events) =
            exporter(ExporterConfig::default(), vec![session_config(1, &[("a", 1)], true)]);
        let now = Instant::now();
        exporter.connection_opened(ConnId(1), addr(IP_A), crate::model::Direction::Inbound, None, now);
        exporter.handle_message(ConnId(1), 0, connect_message(IP_A, Capabilities::STRUCTURE), now);
        exporter.transport_mut().take(ConnId(1));

        let request = Template::new(1, "DOCSIS", "CPE-Type");
        exporter.handle_message(ConnId(1), 1, modification(0, request), now);
        let sent = exporter.transport_mut().take_messages(ConnId(1));
        assert!(matches!(
            sent.as_slice(),
            [Message::Error(ErrorReport {
                code: ErrorCode::MessageInvalidForCapabilities,
                ..
            })]
        ));
        assert_eq!(exporter.connection(ConnId(1)).unwrap().invalid_state_count, 0);
    }

    #[test]
    fn test_start_negotiation_on_active_path() {
        let (mut exporter, _events) =
            exporter(ExporterConfig::default(), vec![session_config(1, &[("a", 1)], true)]);
        let now = Instant::now();
        start_flow(&mut exporter, ConnId(1), IP_A, 1, now);
        exporter.transport_mut().take(ConnId(1));

        exporter.handle_message(ConnId(1), 1, Message::StartNegotiation, now);
        let sent = exporter.transport_mut().take_messages(ConnId(1));
        match sent.as_slice() {
            [Message::SessionStop {
                reason: SessionStopReason::Renegotiation,
                ..
            }, Message::TemplateData(set)] => assert!(set.negotiable()),
            other => panic!("unexpected messages {:?}", other),
        }
        let session = exporter.session(1).unwrap();
        assert_eq!(session.active, None);
        assert_eq!(session.path_state(A), Some(CsState::Initiation));

        exporter.handle_message(ConnId(1), 1, Message::FinalTemplateDataAck, now);
        assert_eq!(exporter.session(1).unwrap().active, Some(A));
    }

    #[test]
    fn test_start_negotiation_rejected_when_not_negotiable() {
        let (mut exporter, _events) =
            exporter(ExporterConfig::default(), vec![session_config(1, &[("a", 1)], false)]);
        let now = Instant::now();
        start_flow(&mut exporter, ConnId(1), IP_A, 1, now);
        exporter.transport_mut().take(ConnId(1));

        exporter.handle_message(ConnId(1), 1, Message::StartNegotiation, now);
        assert_eq!(
            exporter.transport_mut().take_messages(ConnId(1)),
            vec![Message::StartNegotiationReject]
        );
        assert_eq!(exporter.session(1).unwrap().active, Some(A));
    }

    #[test]
    fn test_start_negotiation_refused_by_application() {
        struct Refuse;
        impl ApplicationHooks for Refuse {
            fn start_negotiation(&self, _session: u8, _collector: CollectorId) -> bool {
                false
            }
        }

        let (exporter, _events) =
            exporter(ExporterConfig::default(), vec![session_config(1, &[("a", 1)], true)]);
        let mut exporter = exporter.with_hooks(Refuse);
        let now = Instant::now();
        start_flow(&mut exporter, ConnId(1), IP_A, 1, now);
        exporter.transport_mut().take(ConnId(1));

        exporter.handle_message(ConnId(1), 1, Message::StartNegotiation, now);
        assert_eq!(
            exporter.transport_mut().take_messages(ConnId(1)),
            vec![Message::StartNegotiationReject]
        );
        let session = exporter.session(1).unwrap();
        assert_eq!(session.active, Some(A));
        assert_eq!(session.path_state(A), Some(CsState::Active));
        assert!(!exporter.timers.is_armed(TimerKind::TemplateAck(CsKey {
            session: 0,
            collector: A
        })));
    }

    #[test]
    fn test_set_templates_counts_dropped_records() {
        let (mut exporter, _events) =
            exporter(ExporterConfig::default(), vec![session_config(1, &[("a", 1)], false)]);
        let now = Instant::now();
        start_flow(&mut exporter, ConnId(1), IP_A, 1, now);
        let handle = exporter.template_handle(1, 1).unwrap();
        for _ in 0..2 {
            exporter.send_data(1, handle, Bytes::from_static(b"old"), now).unwrap();
        }
        exporter.transport_mut().take(ConnId(1));

        exporter.set_templates(1, templates(), false, now).unwrap();
        assert_eq!(exporter.session(1).unwrap().stats.records_lost, 2);
        exporter.transport_mut().take(ConnId(1));

        exporter.handle_message(ConnId(1), 1, Message::FinalTemplateDataAck, now);
        let sent = exporter.transport_mut().take_messages(ConnId(1));
        match sent.as_slice() {
            [Message::SessionStart(start)] => {
                assert_eq!(start.dropped_record_count, 2);
                assert_eq!(start.first_record_sequence_number, 2);
            }
            other => panic!("unexpected messages {:?}", other),
        }
    }

    #[test]
    fn test_set_templates_restarts_paths() {
        let (mut exporter, mut events) = exporter(
            ExporterConfig::default(),
            vec![session_config(1, &[("a", 1), ("b", 5)], false)],
        );
        let now = Instant::now();
        start_flow(&mut exporter, ConnId(1), IP_A, 1, now);
        start_flow(&mut exporter, ConnId(2), IP_B, 1, now);
        let old_document = exporter.session(1).unwrap().document_id;
        exporter.transport_mut().take(ConnId(1));
        exporter.transport_mut().take(ConnId(2));
        drain(&mut events);

        let replacement = vec![Template::new(7, "DOCSIS", "CMTS-Type").with_key(Key::new(0x21, 9, "Count"))];
        let config_id = exporter.set_templates(1, replacement.clone(), true, now).unwrap();
        assert_eq!(config_id, 1);

        let to_a = exporter.transport_mut().take_messages(ConnId(1));
        assert!(matches!(
            to_a.as_slice(),
            [Message::SessionStop {
                reason: SessionStopReason::TemplateChanged,
                ..
            }, Message::TemplateData(set)] if set.config_id == 1 && set.templates == replacement
        ));
        assert!(matches!(
            exporter.transport_mut().take_messages(ConnId(2)).as_slice(),
            [Message::TemplateData(_)]
        ));
        let session = exporter.session(1).unwrap();
        assert_ne!(session.document_id, old_document);
        assert_eq!(session.path_state(A), Some(CsState::Initiation));
        assert_eq!(session.path_state(B), Some(CsState::Initiation));
        assert!(drain(&mut events).contains(&ExporterEvent::TemplatesChanged {
            session: 1,
            config_id: 1
        }));

        exporter.handle_message(ConnId(1), 1, Message::FinalTemplateDataAck, now);
        assert_eq!(exporter.session(1).unwrap().active, Some(A));
    }

    #[test]
    fn test_get_templates_and_sessions() {
        let (mut exporter, _events) = exporter(
            ExporterConfig::default(),
            vec![
                session_config(1, &[("a", 1)], false),
                session_config(2, &[("b", 1)], false),
                session_config(3, &[("a", 2), ("b", 2)], false),
            ],
        );
        let now = Instant::now();
        connect(&mut exporter, ConnId(1), IP_A, now);

        exporter.handle_message(ConnId(1), 0, Message::GetSessions { request_id: 11 }, now);
        exporter.handle_message(ConnId(1), 3, Message::GetTemplates { request_id: 12 }, now);
        let sent = exporter.transport_mut().take(ConnId(1));
        match sent.as_slice() {
            [(0, Message::GetSessionsResponse { request_id: 11, sessions }), (3, Message::GetTemplatesResponse {
                request_id: 12,
                config_id: 0,
                templates: listed,
            })] => {
                let ids: Vec<u8> = sessions.iter().map(|s| s.session_id).collect();
                assert_eq!(ids, vec![1, 3]);
                assert_eq!(sessions[0].ack_sequence_interval, 200);
                assert_eq!(*listed, templates());
            }
            other => panic!("unexpected messages {:?}", other),
        }
    }
}
