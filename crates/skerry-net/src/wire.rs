//! Little-endian wire encoding helpers.
//!
//! Message bodies are encoded with fixed-width little-endian primitives.
//! Aggregates carry a leading version byte; strings and byte blobs are
//! `u32` length + contents; sets and maps are `u32` count + ordered
//! entries. Every read checks the remaining length first, so truncated or
//! corrupt replies surface as a [`DecodeError`] instead of a panic.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// A reply (or payload) failed to decode.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DecodeError {
    /// The buffer ended before the field did.
    #[error("truncated buffer: need {need} more bytes, have {have}")]
    Truncated {
        /// Bytes the next field requires.
        need: usize,
        /// Bytes left in the buffer.
        have: usize,
    },

    /// A string field was not valid UTF-8.
    #[error("invalid utf-8 in string field")]
    BadUtf8,

    /// Unknown message type code in a frame.
    #[error("unknown message type {0:#x}")]
    UnknownType(u32),

    /// An aggregate carried a version this build does not understand.
    #[error("unsupported struct version {found} (expected {expected})")]
    BadVersion {
        /// Version found on the wire.
        found: u8,
        /// Version this build encodes.
        expected: u8,
    },

    /// A field held a value outside its domain.
    #[error("bad field value: {0}")]
    BadValue(String),
}

fn need(buf: &Bytes, n: usize) -> Result<(), DecodeError> {
    if buf.remaining() < n {
        return Err(DecodeError::Truncated {
            need: n,
            have: buf.remaining(),
        });
    }
    Ok(())
}

/// Read a `u8`.
pub fn take_u8(buf: &mut Bytes) -> Result<u8, DecodeError> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

/// Read a little-endian `u32`.
pub fn take_u32(buf: &mut Bytes) -> Result<u32, DecodeError> {
    need(buf, 4)?;
    Ok(buf.get_u32_le())
}

/// Read a little-endian `i32`.
pub fn take_i32(buf: &mut Bytes) -> Result<i32, DecodeError> {
    need(buf, 4)?;
    Ok(buf.get_i32_le())
}

/// Read a little-endian `u64`.
pub fn take_u64(buf: &mut Bytes) -> Result<u64, DecodeError> {
    need(buf, 8)?;
    Ok(buf.get_u64_le())
}

/// Read a length-prefixed byte blob.
pub fn take_blob(buf: &mut Bytes) -> Result<Bytes, DecodeError> {
    let len = take_u32(buf)? as usize;
    need(buf, len)?;
    Ok(buf.split_to(len))
}

/// Read a length-prefixed UTF-8 string.
pub fn take_string(buf: &mut Bytes) -> Result<String, DecodeError> {
    let raw = take_blob(buf)?;
    String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::BadUtf8)
}

/// Read a 16-byte uuid.
pub fn take_uuid(buf: &mut Bytes) -> Result<Uuid, DecodeError> {
    need(buf, 16)?;
    let mut raw = [0u8; 16];
    buf.copy_to_slice(&mut raw);
    Ok(Uuid::from_bytes(raw))
}

/// Read a version byte and require it to match `expected`.
pub fn take_version(buf: &mut Bytes, expected: u8) -> Result<(), DecodeError> {
    let found = take_u8(buf)?;
    if found != expected {
        return Err(DecodeError::BadVersion { found, expected });
    }
    Ok(())
}

/// Append a length-prefixed byte blob.
pub fn put_blob(buf: &mut BytesMut, blob: &[u8]) {
    buf.put_u32_le(blob.len() as u32);
    buf.put_slice(blob);
}

/// Append a length-prefixed UTF-8 string.
pub fn put_string(buf: &mut BytesMut, s: &str) {
    put_blob(buf, s.as_bytes());
}

/// Append a 16-byte uuid.
pub fn put_uuid(buf: &mut BytesMut, uuid: &Uuid) {
    buf.put_slice(uuid.as_bytes());
}
