//! IPDR/SP wire protocol: message framing, typed encoding/decoding and
//! template descriptors.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u8 version (2)       | protocol version           |
//! +----------------------+----------------------------+
//! | u8 message_id        | message type               |
//! +----------------------+----------------------------+
//! | u8 session_id        | 0 for connection messages  |
//! +----------------------+----------------------------+
//! | u8 message_flags     | reserved                   |
//! +----------------------+----------------------------+
//! | u32 message_length   | header + payload           |
//! +----------------------+----------------------------+
//! | payload              | variable (0..N)            |
//! +----------------------+----------------------------+
//! ```
//!
//! All integers are big-endian. Strings are a `u32` length followed by the
//! raw bytes; repeated structures are a `u32` count followed by the elements.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod frame;
pub mod header;
pub mod message;
pub mod template;

// Re-export main types
pub use error::WireError;
pub use frame::{Frame, FrameDecoder, DEFAULT_MAX_MESSAGE_SIZE};
pub use header::{
    Capabilities, DataFlags, ErrorCode, MessageHeader, MessageId, SessionStopReason,
    TemplateFlags, HEADER_SIZE, PROTOCOL_VERSION,
};
pub use message::{
    Connect, ConnectResponse, DataRecord, ErrorReport, Message, SessionBlock, SessionStart,
    TemplateSet, DOCUMENT_ID_LEN,
};
pub use template::{Key, Template};
