//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Incomplete message (need more data)
    #[error("incomplete message")]
    Incomplete,

    /// Unsupported protocol version
    #[error("version unsupported: {0}")]
    Version(u8),

    /// Unknown message id
    #[error("unknown message id 0x{0:02x}")]
    UnknownMessage(u8),

    /// A field could not be read without running past the buffer, or held a
    /// value outside its domain
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// String field is not valid UTF-8
    #[error("string field is not valid utf-8")]
    Utf8,
}
