//! Typed protocol messages.
//!
//! A [`Message`] is the decoded payload of one frame. Encoding produces the
//! complete wire message (header included); decoding consumes exactly the
//! payload announced by the header and rejects trailing bytes.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::codec::{
    get_bytes, get_count, get_fixed, get_string, get_u16, get_u32, get_u64, get_u8, put_bytes,
    put_string, string_len,
};
use crate::header::{
    Capabilities, DataFlags, ErrorCode, MessageHeader, MessageId, SessionStopReason,
    TemplateFlags, HEADER_SIZE,
};
use crate::template::{decode_templates, encode_templates, templates_len, Template};
use crate::WireError;

/// Length of the SESSION_START document id
pub const DOCUMENT_ID_LEN: usize = 16;

/// Smallest possible encoded session block
const MIN_SESSION_BLOCK_SIZE: usize = 1 + 1 + 4 + 4 + 4 + 4;

/// CONNECT payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    /// IPv4 address of the initiator as a big-endian integer
    pub initiator_id: u32,
    /// Port the initiator listens on (0 when not listening)
    pub initiator_port: u16,
    /// Capabilities offered by the initiator
    pub capabilities: Capabilities,
    /// Keepalive interval in seconds
    pub keepalive_interval: u32,
    /// Free-form vendor identification
    pub vendor_id: String,
}

/// CONNECT_RESPONSE payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResponse {
    /// Capabilities offered by the responder
    pub capabilities: Capabilities,
    /// Keepalive interval in seconds
    pub keepalive_interval: u32,
    /// Free-form vendor identification
    pub vendor_id: String,
}

/// SESSION_START payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStart {
    /// Exporter boot time, seconds since the Unix epoch
    pub exporter_boot_time: u32,
    /// Sequence number of the first record the collector will see
    pub first_record_sequence_number: u64,
    /// Records lost by the exporter before this point
    pub dropped_record_count: u64,
    /// Whether the receiving collector is the primary
    pub primary: bool,
    /// Maximum seconds between DATA_ACKs
    pub ack_time_interval: u32,
    /// Maximum records between DATA_ACKs
    pub ack_sequence_interval: u32,
    /// Document identifier
    pub document_id: [u8; DOCUMENT_ID_LEN],
}

/// Payload shared by TEMPLATE_DATA, MODIFY_TEMPLATE and MODIFY_TEMPLATE_RESPONSE
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSet {
    /// Configuration id of the transmission context
    pub config_id: u16,
    /// Template flags
    pub flags: TemplateFlags,
    /// Templates in announcement order
    pub templates: Vec<Template>,
}

impl TemplateSet {
    /// Whether the set is marked negotiable
    pub fn negotiable(&self) -> bool {
        self.flags.contains(TemplateFlags::NEGOTIABLE)
    }
}

/// One entry of GET_SESSIONS_RESPONSE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionBlock {
    /// Session id
    pub session_id: u8,
    /// Session name
    pub name: String,
    /// Session description
    pub description: String,
    /// Maximum seconds between DATA_ACKs
    pub ack_time_interval: u32,
    /// Maximum records between DATA_ACKs
    pub ack_sequence_interval: u32,
}

/// DATA payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRecord {
    /// Template the record was encoded with
    pub template_id: u16,
    /// Configuration id of the template's context
    pub config_id: u16,
    /// Record flags
    pub flags: DataFlags,
    /// Data sequence number
    pub sequence_num: u64,
    /// Opaque encoded record
    pub record: Bytes,
}

/// ERROR payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// Seconds since the Unix epoch
    pub timestamp: u32,
    /// Error code
    pub code: ErrorCode,
    /// Human readable description
    pub description: String,
}

/// Decoded protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// FLOW_START
    FlowStart,
    /// FLOW_STOP
    FlowStop {
        /// Reason code
        reason_code: u16,
        /// Free-form reason
        reason_info: String,
    },
    /// CONNECT
    Connect(Connect),
    /// CONNECT_RESPONSE
    ConnectResponse(ConnectResponse),
    /// DISCONNECT
    Disconnect,
    /// SESSION_START
    SessionStart(SessionStart),
    /// SESSION_STOP
    SessionStop {
        /// Reason
        reason: SessionStopReason,
        /// Free-form reason
        reason_info: String,
    },
    /// TEMPLATE_DATA
    TemplateData(TemplateSet),
    /// FINAL_TEMPLATE_DATA_ACK
    FinalTemplateDataAck,
    /// GET_SESSIONS
    GetSessions {
        /// Request correlation id
        request_id: u16,
    },
    /// GET_SESSIONS_RESPONSE
    GetSessionsResponse {
        /// Request correlation id
        request_id: u16,
        /// Sessions visible to the requester
        sessions: Vec<SessionBlock>,
    },
    /// GET_TEMPLATES
    GetTemplates {
        /// Request correlation id
        request_id: u16,
    },
    /// GET_TEMPLATES_RESPONSE
    GetTemplatesResponse {
        /// Request correlation id
        request_id: u16,
        /// Configuration id of the active context
        config_id: u16,
        /// Templates of the active context
        templates: Vec<Template>,
    },
    /// MODIFY_TEMPLATE
    ModifyTemplate(TemplateSet),
    /// MODIFY_TEMPLATE_RESPONSE
    ModifyTemplateResponse(TemplateSet),
    /// START_NEGOTIATION
    StartNegotiation,
    /// START_NEGOTIATION_REJECT
    StartNegotiationReject,
    /// DATA
    Data(DataRecord),
    /// DATA_ACK
    DataAck {
        /// Configuration id the acknowledged records belong to
        config_id: u16,
        /// Highest acknowledged sequence number
        sequence_num: u64,
    },
    /// ERROR
    Error(ErrorReport),
    /// KEEP_ALIVE
    KeepAlive,
}

impl Message {
    /// Message id of this message
    pub fn message_id(&self) -> MessageId {
        match self {
            Message::FlowStart => MessageId::FlowStart,
            Message::FlowStop { .. } => MessageId::FlowStop,
            Message::Connect(_) => MessageId::Connect,
            Message::ConnectResponse(_) => MessageId::ConnectResponse,
            Message::Disconnect => MessageId::Disconnect,
            Message::SessionStart(_) => MessageId::SessionStart,
            Message::SessionStop { .. } => MessageId::SessionStop,
            Message::TemplateData(_) => MessageId::TemplateData,
            Message::FinalTemplateDataAck => MessageId::FinalTemplateDataAck,
            Message::GetSessions { .. } => MessageId::GetSessions,
            Message::GetSessionsResponse { .. } => MessageId::GetSessionsResponse,
            Message::GetTemplates { .. } => MessageId::GetTemplates,
            Message::GetTemplatesResponse { .. } => MessageId::GetTemplatesResponse,
            Message::ModifyTemplate(_) => MessageId::ModifyTemplate,
            Message::ModifyTemplateResponse(_) => MessageId::ModifyTemplateResponse,
            Message::StartNegotiation => MessageId::StartNegotiation,
            Message::StartNegotiationReject => MessageId::StartNegotiationReject,
            Message::Data(_) => MessageId::Data,
            Message::DataAck { .. } => MessageId::DataAck,
            Message::Error(_) => MessageId::Error,
            Message::KeepAlive => MessageId::KeepAlive,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Message::FlowStart
            | Message::Disconnect
            | Message::FinalTemplateDataAck
            | Message::StartNegotiation
            | Message::StartNegotiationReject
            | Message::KeepAlive => 0,
            Message::FlowStop { reason_info, .. } | Message::SessionStop { reason_info, .. } => {
                2 + string_len(reason_info)
            }
            Message::Connect(c) => 4 + 2 + 4 + 4 + string_len(&c.vendor_id),
            Message::ConnectResponse(c) => 4 + 4 + string_len(&c.vendor_id),
            Message::SessionStart(_) => 4 + 8 + 8 + 1 + 4 + 4 + DOCUMENT_ID_LEN,
            Message::TemplateData(set)
            | Message::ModifyTemplate(set)
            | Message::ModifyTemplateResponse(set) => 2 + 1 + templates_len(&set.templates),
            Message::GetSessions { .. } | Message::GetTemplates { .. } => 2,
            Message::GetSessionsResponse { sessions, .. } => {
                2 + 4
                    + sessions
                        .iter()
                        .map(|s| 2 + string_len(&s.name) + string_len(&s.description) + 8)
                        .sum::<usize>()
            }
            Message::GetTemplatesResponse { templates, .. } => 2 + 2 + templates_len(templates),
            Message::Data(d) => 2 + 2 + 1 + 8 + 4 + d.record.len(),
            Message::DataAck { .. } => 2 + 8,
            Message::Error(e) => 4 + 2 + string_len(&e.description),
        }
    }

    /// Encode the full message (header and payload) for the given session
    pub fn encode(&self, session_id: u8) -> Bytes {
        let payload_len = self.payload_len();
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload_len);
        MessageHeader::new(self.message_id(), session_id, payload_len).encode(&mut buf);

        match self {
            Message::FlowStart
            | Message::Disconnect
            | Message::FinalTemplateDataAck
            | Message::StartNegotiation
            | Message::StartNegotiationReject
            | Message::KeepAlive => {}
            Message::FlowStop {
                reason_code,
                reason_info,
            } => {
                buf.put_u16(*reason_code);
                put_string(&mut buf, reason_info);
            }
            Message::SessionStop {
                reason,
                reason_info,
            } => {
                buf.put_u16(*reason as u16);
                put_string(&mut buf, reason_info);
            }
            Message::Connect(c) => {
                buf.put_u32(c.initiator_id);
                buf.put_u16(c.initiator_port);
                buf.put_u32(c.capabilities.bits());
                buf.put_u32(c.keepalive_interval);
                put_string(&mut buf, &c.vendor_id);
            }
            Message::ConnectResponse(c) => {
                buf.put_u32(c.capabilities.bits());
                buf.put_u32(c.keepalive_interval);
                put_string(&mut buf, &c.vendor_id);
            }
            Message::SessionStart(s) => {
                buf.put_u32(s.exporter_boot_time);
                buf.put_u64(s.first_record_sequence_number);
                buf.put_u64(s.dropped_record_count);
                buf.put_u8(s.primary as u8);
                buf.put_u32(s.ack_time_interval);
                buf.put_u32(s.ack_sequence_interval);
                buf.put_slice(&s.document_id);
            }
            Message::TemplateData(set)
            | Message::ModifyTemplate(set)
            | Message::ModifyTemplateResponse(set) => {
                buf.put_u16(set.config_id);
                buf.put_u8(set.flags.bits());
                encode_templates(&mut buf, &set.templates);
            }
            Message::GetSessions { request_id } | Message::GetTemplates { request_id } => {
                buf.put_u16(*request_id);
            }
            Message::GetSessionsResponse {
                request_id,
                sessions,
            } => {
                buf.put_u16(*request_id);
                buf.put_u32(sessions.len() as u32);
                for s in sessions {
                    buf.put_u8(s.session_id);
                    buf.put_u8(0);
                    put_string(&mut buf, &s.name);
                    put_string(&mut buf, &s.description);
                    buf.put_u32(s.ack_time_interval);
                    buf.put_u32(s.ack_sequence_interval);
                }
            }
            Message::GetTemplatesResponse {
                request_id,
                config_id,
                templates,
            } => {
                buf.put_u16(*request_id);
                buf.put_u16(*config_id);
                encode_templates(&mut buf, templates);
            }
            Message::Data(d) => {
                buf.put_u16(d.template_id);
                buf.put_u16(d.config_id);
                buf.put_u8(d.flags.bits());
                buf.put_u64(d.sequence_num);
                put_bytes(&mut buf, &d.record);
            }
            Message::DataAck {
                config_id,
                sequence_num,
            } => {
                buf.put_u16(*config_id);
                buf.put_u64(*sequence_num);
            }
            Message::Error(e) => {
                buf.put_u32(e.timestamp);
                buf.put_u16(e.code.as_u16());
                put_string(&mut buf, &e.description);
            }
        }

        buf.freeze()
    }

    /// Decode a payload whose header has already been parsed
    pub fn decode(message_id: MessageId, mut payload: Bytes) -> Result<Self, WireError> {
        let buf = &mut payload;
        let message = match message_id {
            MessageId::FlowStart => Message::FlowStart,
            MessageId::Disconnect => Message::Disconnect,
            MessageId::FinalTemplateDataAck => Message::FinalTemplateDataAck,
            MessageId::StartNegotiation => Message::StartNegotiation,
            MessageId::StartNegotiationReject => Message::StartNegotiationReject,
            MessageId::KeepAlive => Message::KeepAlive,
            MessageId::FlowStop => Message::FlowStop {
                reason_code: get_u16(buf, "reason code")?,
                reason_info: get_string(buf, "reason info")?,
            },
            MessageId::SessionStop => Message::SessionStop {
                reason: SessionStopReason::try_from(get_u16(buf, "reason code")?)?,
                reason_info: get_string(buf, "reason info")?,
            },
            MessageId::Connect => Message::Connect(Connect {
                initiator_id: get_u32(buf, "initiator id")?,
                initiator_port: get_u16(buf, "initiator port")?,
                capabilities: Capabilities::from_bits_retain(get_u32(buf, "capabilities")?),
                keepalive_interval: get_u32(buf, "keepalive interval")?,
                vendor_id: get_string(buf, "vendor id")?,
            }),
            MessageId::ConnectResponse => Message::ConnectResponse(ConnectResponse {
                capabilities: Capabilities::from_bits_retain(get_u32(buf, "capabilities")?),
                keepalive_interval: get_u32(buf, "keepalive interval")?,
                vendor_id: get_string(buf, "vendor id")?,
            }),
            MessageId::SessionStart => {
                let exporter_boot_time = get_u32(buf, "boot time")?;
                let first_record_sequence_number = get_u64(buf, "first record sequence")?;
                let dropped_record_count = get_u64(buf, "dropped record count")?;
                let primary = get_u8(buf, "primary")? != 0;
                let ack_time_interval = get_u32(buf, "ack time interval")?;
                let ack_sequence_interval = get_u32(buf, "ack sequence interval")?;
                let raw = get_fixed(buf, DOCUMENT_ID_LEN, "document id")?;
                let mut document_id = [0u8; DOCUMENT_ID_LEN];
                document_id.copy_from_slice(&raw);
                Message::SessionStart(SessionStart {
                    exporter_boot_time,
                    first_record_sequence_number,
                    dropped_record_count,
                    primary,
                    ack_time_interval,
                    ack_sequence_interval,
                    document_id,
                })
            }
            MessageId::TemplateData => Message::TemplateData(decode_template_set(buf)?),
            MessageId::ModifyTemplate => Message::ModifyTemplate(decode_template_set(buf)?),
            MessageId::ModifyTemplateResponse => {
                Message::ModifyTemplateResponse(decode_template_set(buf)?)
            }
            MessageId::GetSessions => Message::GetSessions {
                request_id: get_u16(buf, "request id")?,
            },
            MessageId::GetTemplates => Message::GetTemplates {
                request_id: get_u16(buf, "request id")?,
            },
            MessageId::GetSessionsResponse => {
                let request_id = get_u16(buf, "request id")?;
                let count = get_count(buf, MIN_SESSION_BLOCK_SIZE, "session count")?;
                let mut sessions = Vec::with_capacity(count);
                for _ in 0..count {
                    let session_id = get_u8(buf, "session id")?;
                    let _reserved = get_u8(buf, "reserved")?;
                    sessions.push(SessionBlock {
                        session_id,
                        name: get_string(buf, "session name")?,
                        description: get_string(buf, "session description")?,
                        ack_time_interval: get_u32(buf, "ack time interval")?,
                        ack_sequence_interval: get_u32(buf, "ack sequence interval")?,
                    });
                }
                Message::GetSessionsResponse {
                    request_id,
                    sessions,
                }
            }
            MessageId::GetTemplatesResponse => Message::GetTemplatesResponse {
                request_id: get_u16(buf, "request id")?,
                config_id: get_u16(buf, "config id")?,
                templates: decode_templates(buf)?,
            },
            MessageId::Data => Message::Data(DataRecord {
                template_id: get_u16(buf, "template id")?,
                config_id: get_u16(buf, "config id")?,
                flags: DataFlags::from_bits_retain(get_u8(buf, "data flags")?),
                sequence_num: get_u64(buf, "sequence number")?,
                record: get_bytes(buf, "data record")?,
            }),
            MessageId::DataAck => Message::DataAck {
                config_id: get_u16(buf, "config id")?,
                sequence_num: get_u64(buf, "sequence number")?,
            },
            MessageId::Error => Message::Error(ErrorReport {
                timestamp: get_u32(buf, "timestamp")?,
                code: ErrorCode::from_u16(get_u16(buf, "error code")?),
                description: get_string(buf, "description")?,
            }),
        };

        if !payload.is_empty() {
            return Err(WireError::InvalidValue("trailing bytes after payload"));
        }

        Ok(message)
    }
}

fn decode_template_set(buf: &mut Bytes) -> Result<TemplateSet, WireError> {
    Ok(TemplateSet {
        config_id: get_u16(buf, "config id")?,
        flags: TemplateFlags::from_bits_retain(get_u8(buf, "template flags")?),
        templates: decode_templates(buf)?,
    })
}
