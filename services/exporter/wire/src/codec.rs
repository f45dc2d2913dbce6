//! Bounded field encoding and decoding helpers.
//!
//! Every `get_*` function checks the remaining length before reading and fails
//! with [`WireError::InvalidValue`] instead of over-reading. Strings are a
//! big-endian `u32` length followed by raw bytes with no padding; arrays are a
//! `u32` element count followed by the elements.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::WireError;

fn ensure(buf: &Bytes, needed: usize, field: &'static str) -> Result<(), WireError> {
    if buf.remaining() < needed {
        return Err(WireError::InvalidValue(field));
    }
    Ok(())
}

/// Read a `u8`
pub fn get_u8(buf: &mut Bytes, field: &'static str) -> Result<u8, WireError> {
    ensure(buf, 1, field)?;
    Ok(buf.get_u8())
}

/// Read a big-endian `u16`
pub fn get_u16(buf: &mut Bytes, field: &'static str) -> Result<u16, WireError> {
    ensure(buf, 2, field)?;
    Ok(buf.get_u16())
}

/// Read a big-endian `u32`
pub fn get_u32(buf: &mut Bytes, field: &'static str) -> Result<u32, WireError> {
    ensure(buf, 4, field)?;
    Ok(buf.get_u32())
}

/// Read a big-endian `u64`
pub fn get_u64(buf: &mut Bytes, field: &'static str) -> Result<u64, WireError> {
    ensure(buf, 8, field)?;
    Ok(buf.get_u64())
}

/// Read `len` raw bytes without copying
pub fn get_fixed(buf: &mut Bytes, len: usize, field: &'static str) -> Result<Bytes, WireError> {
    ensure(buf, len, field)?;
    Ok(buf.split_to(len))
}

/// Read a length-prefixed byte string without copying
pub fn get_bytes(buf: &mut Bytes, field: &'static str) -> Result<Bytes, WireError> {
    let len = get_u32(buf, field)? as usize;
    get_fixed(buf, len, field)
}

/// Read a length-prefixed UTF-8 string
pub fn get_string(buf: &mut Bytes, field: &'static str) -> Result<String, WireError> {
    let raw = get_bytes(buf, field)?;
    String::from_utf8(raw.to_vec()).map_err(|_| WireError::Utf8)
}

/// Read an array count.
///
/// Each element occupies at least `min_element_size` bytes, so a count that
/// cannot possibly fit in the remaining buffer is rejected up front rather than
/// driving a huge allocation.
pub fn get_count(
    buf: &mut Bytes,
    min_element_size: usize,
    field: &'static str,
) -> Result<usize, WireError> {
    let count = get_u32(buf, field)? as usize;
    if count.saturating_mul(min_element_size.max(1)) > buf.remaining() {
        return Err(WireError::InvalidValue(field));
    }
    Ok(count)
}

/// Write a length-prefixed byte string
pub fn put_bytes(buf: &mut BytesMut, value: &[u8]) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

/// Write a length-prefixed UTF-8 string
pub fn put_string(buf: &mut BytesMut, value: &str) {
    put_bytes(buf, value.as_bytes());
}

/// Encoded size of a length-prefixed string
pub fn string_len(value: &str) -> usize {
    4 + value.len()
}
