//! Stream framing.
//!
//! Messages are delimited by the length field of their header; the decoder
//! buffers until a whole message is available.

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::header::{MessageHeader, HEADER_SIZE, PROTOCOL_VERSION};
use crate::message::Message;
use crate::WireError;

/// Maximum message size accepted by default (16 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// One complete message as read from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Parsed header
    pub header: MessageHeader,
    /// Raw payload (exactly `header.payload_len()` bytes)
    pub payload: Bytes,
}

impl Frame {
    /// Decode the payload into a typed message
    pub fn message(&self) -> Result<Message, WireError> {
        Message::decode(self.header.message_id, self.payload.clone())
    }
}

/// Frame decoder for parsing incoming messages
#[derive(Debug)]
pub struct FrameDecoder {
    max_message_size: usize,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Create a decoder with a custom size limit
    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Decode one frame from a buffer
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        if buf[0] != PROTOCOL_VERSION {
            return Err(WireError::Version(buf[0]));
        }

        // Peek at message length
        let length = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        if length < HEADER_SIZE {
            return Err(WireError::InvalidValue("message length below header size"));
        }
        if length > self.max_message_size {
            return Err(WireError::Size(length));
        }

        if buf.len() < length {
            return Ok(None);
        }

        let mut raw = buf.split_to(length).freeze();
        let header = MessageHeader::decode(&mut raw)?;
        trace!(message_id = ?header.message_id, length, "decoded frame");

        Ok(Some(Frame {
            header,
            payload: raw,
        }))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
