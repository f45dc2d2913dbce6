//! Fixed message header and protocol-level code tables.
//!
//! Every IPDR/SP message starts with an 8-byte header carrying the protocol
//! version, the message id, the session id the message belongs to, a flags
//! byte and the total message length (header included).

use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::WireError;

/// Wire protocol version
pub const PROTOCOL_VERSION: u8 = 2;

/// Message header size in bytes
pub const HEADER_SIZE: usize = 8;

/// Message identifiers as defined by the streaming protocol
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageId {
    /// Collector asks the exporter to start a session flow
    FlowStart = 0x01,
    /// Collector stops a session flow
    FlowStop = 0x03,
    /// Connection initiation
    Connect = 0x05,
    /// Reply to CONNECT
    ConnectResponse = 0x06,
    /// Orderly connection teardown
    Disconnect = 0x07,
    /// Exporter starts streaming a session
    SessionStart = 0x08,
    /// Exporter stops streaming a session
    SessionStop = 0x09,
    /// Template announcement
    TemplateData = 0x10,
    /// Collector accepts the announced templates
    FinalTemplateDataAck = 0x13,
    /// Session enumeration request
    GetSessions = 0x14,
    /// Session enumeration reply
    GetSessionsResponse = 0x15,
    /// Template enumeration request
    GetTemplates = 0x16,
    /// Template enumeration reply
    GetTemplatesResponse = 0x17,
    /// Collector proposes enabled-field changes
    ModifyTemplate = 0x1a,
    /// Exporter reply to MODIFY_TEMPLATE
    ModifyTemplateResponse = 0x1b,
    /// Collector asks for a renegotiation
    StartNegotiation = 0x1d,
    /// Exporter refuses a renegotiation
    StartNegotiationReject = 0x1e,
    /// Usage record
    Data = 0x20,
    /// Acknowledgement of usage records
    DataAck = 0x21,
    /// Protocol error report
    Error = 0x23,
    /// Liveness probe
    KeepAlive = 0x40,
}

impl MessageId {
    /// Whether the message must carry a valid session id.
    pub fn requires_session(self) -> bool {
        !matches!(
            self,
            MessageId::Connect
                | MessageId::ConnectResponse
                | MessageId::Disconnect
                | MessageId::Error
                | MessageId::KeepAlive
                | MessageId::GetSessions
                | MessageId::GetSessionsResponse
                | MessageId::GetTemplatesResponse
        )
    }
}

impl TryFrom<u8> for MessageId {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0x01 => Ok(MessageId::FlowStart),
            0x03 => Ok(MessageId::FlowStop),
            0x05 => Ok(MessageId::Connect),
            0x06 => Ok(MessageId::ConnectResponse),
            0x07 => Ok(MessageId::Disconnect),
            0x08 => Ok(MessageId::SessionStart),
            0x09 => Ok(MessageId::SessionStop),
            0x10 => Ok(MessageId::TemplateData),
            0x13 => Ok(MessageId::FinalTemplateDataAck),
            0x14 => Ok(MessageId::GetSessions),
            0x15 => Ok(MessageId::GetSessionsResponse),
            0x16 => Ok(MessageId::GetTemplates),
            0x17 => Ok(MessageId::GetTemplatesResponse),
            0x1a => Ok(MessageId::ModifyTemplate),
            0x1b => Ok(MessageId::ModifyTemplateResponse),
            0x1d => Ok(MessageId::StartNegotiation),
            0x1e => Ok(MessageId::StartNegotiationReject),
            0x20 => Ok(MessageId::Data),
            0x21 => Ok(MessageId::DataAck),
            0x23 => Ok(MessageId::Error),
            0x40 => Ok(MessageId::KeepAlive),
            _ => Err(WireError::UnknownMessage(value)),
        }
    }
}

bitflags! {
    /// Capability bitmap exchanged in CONNECT / CONNECT_RESPONSE
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Capabilities: u32 {
        /// Structured record types
        const STRUCTURE = 0x01;
        /// More than one session per connection
        const MULTISESSION = 0x02;
        /// MODIFY_TEMPLATE / START_NEGOTIATION
        const TEMPLATE_NEGOTIATION = 0x04;
        /// Request/response record delivery
        const REQUEST_RESPONSE = 0x08;
    }
}

bitflags! {
    /// Flags byte of TEMPLATE_DATA, MODIFY_TEMPLATE and MODIFY_TEMPLATE_RESPONSE
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TemplateFlags: u8 {
        /// The collector may modify the announced templates
        const NEGOTIABLE = 0x01;
    }
}

bitflags! {
    /// Flags byte of DATA
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct DataFlags: u8 {
        /// The record may already have been delivered on another path
        const DUPLICATE = 0x01;
    }
}

/// ERROR message codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// No message received within the keepalive interval
    KeepAliveExpired,
    /// Message requires a capability that was not negotiated
    MessageInvalidForCapabilities,
    /// Message not valid in the current session state
    MessageInvalidForState,
    /// Message could not be decoded
    MessageDecodeError,
    /// Sender is shutting down
    ProcessTerminating,
    /// Session id is not configured
    UnknownSession,
    /// Message not valid in the current connection state
    InvalidConnectionState,
    /// MODIFY_TEMPLATE does not match the announced templates
    BrokenTemplate,
    /// Peer is not a configured collector
    CollectorNotConfigured,
    /// Collector is not configured for the addressed session
    CollectorNotInSession,
    /// FINAL_TEMPLATE_DATA_ACK did not arrive in time
    TemplateDataAckExpired,
    /// Any other code
    Other(u16),
}

impl ErrorCode {
    /// Numeric value on the wire
    pub fn as_u16(self) -> u16 {
        match self {
            ErrorCode::KeepAliveExpired => 0,
            ErrorCode::MessageInvalidForCapabilities => 1,
            ErrorCode::MessageInvalidForState => 2,
            ErrorCode::MessageDecodeError => 3,
            ErrorCode::ProcessTerminating => 4,
            ErrorCode::UnknownSession => 256,
            ErrorCode::InvalidConnectionState => 257,
            ErrorCode::BrokenTemplate => 258,
            ErrorCode::CollectorNotConfigured => 259,
            ErrorCode::CollectorNotInSession => 260,
            ErrorCode::TemplateDataAckExpired => 261,
            ErrorCode::Other(code) => code,
        }
    }

    /// Parse a numeric code; unknown values are preserved as `Other`
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => ErrorCode::KeepAliveExpired,
            1 => ErrorCode::MessageInvalidForCapabilities,
            2 => ErrorCode::MessageInvalidForState,
            3 => ErrorCode::MessageDecodeError,
            4 => ErrorCode::ProcessTerminating,
            256 => ErrorCode::UnknownSession,
            257 => ErrorCode::InvalidConnectionState,
            258 => ErrorCode::BrokenTemplate,
            259 => ErrorCode::CollectorNotConfigured,
            260 => ErrorCode::CollectorNotInSession,
            261 => ErrorCode::TemplateDataAckExpired,
            other => ErrorCode::Other(other),
        }
    }
}

/// SESSION_STOP reason codes
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStopReason {
    /// No more data for the session
    EndOfData = 0,
    /// Handing off to a higher priority collector
    HandingOff = 1,
    /// Exporter is terminating
    ExporterTerminating = 2,
    /// Congestion detected
    Congestion = 3,
    /// Renegotiation required
    Renegotiation = 4,
    /// Acknowledges START_NEGOTIATION
    StartNegotiationAck = 5,
    /// End of the IPDR document
    EndOfDocument = 6,
    /// Templates changed by the exporter application
    TemplateChanged = 256,
}

impl TryFrom<u16> for SessionStopReason {
    type Error = WireError;

    fn try_from(value: u16) -> Result<Self, WireError> {
        match value {
            0 => Ok(SessionStopReason::EndOfData),
            1 => Ok(SessionStopReason::HandingOff),
            2 => Ok(SessionStopReason::ExporterTerminating),
            3 => Ok(SessionStopReason::Congestion),
            4 => Ok(SessionStopReason::Renegotiation),
            5 => Ok(SessionStopReason::StartNegotiationAck),
            6 => Ok(SessionStopReason::EndOfDocument),
            256 => Ok(SessionStopReason::TemplateChanged),
            _ => Err(WireError::InvalidValue("session stop reason")),
        }
    }
}

/// Message header (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Protocol version (must be 2)
    pub version: u8,
    /// Message type
    pub message_id: MessageId,
    /// Session the message belongs to (0 for connection-level messages)
    pub session_id: u8,
    /// Message flags (reserved, zero)
    pub flags: u8,
    /// Total message length including this header
    pub length: u32,
}

impl MessageHeader {
    /// Create a header for a message with the given payload length
    pub fn new(message_id: MessageId, session_id: u8, payload_len: usize) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message_id,
            session_id,
            flags: 0,
            length: (HEADER_SIZE + payload_len) as u32,
        }
    }

    /// Length of the payload that follows the header
    pub fn payload_len(&self) -> usize {
        (self.length as usize).saturating_sub(HEADER_SIZE)
    }

    /// Encode the header to bytes (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_u8(self.message_id as u8);
        buf.put_u8(self.session_id);
        buf.put_u8(self.flags);
        buf.put_u32(self.length);
    }

    /// Decode the header from bytes (big-endian)
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        if buf.remaining() < HEADER_SIZE {
            return Err(WireError::Incomplete);
        }

        let version = buf.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(WireError::Version(version));
        }

        let message_id = MessageId::try_from(buf.get_u8())?;
        let session_id = buf.get_u8();
        let flags = buf.get_u8();
        let length = buf.get_u32();

        if (length as usize) < HEADER_SIZE {
            return Err(WireError::InvalidValue("message length below header size"));
        }

        Ok(Self {
            version,
            message_id,
            session_id,
            flags,
            length,
        })
    }
}
