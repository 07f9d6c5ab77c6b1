//! Codec for encoding and decoding huddle events.
//!
//! This module provides MessagePack-based serialization with length-prefixed
//! framing. Client and server events share the framing but decode through
//! separate entry points, so each side rejects the other's vocabulary.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::events::{ClientEvent, ServerEvent};

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode a frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

fn encode_value<T: Serialize>(value: &T) -> Result<Bytes, ProtocolError> {
    let payload = rmp_serde::to_vec_named(value)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(buf.freeze())
}

fn decode_value_from<T: DeserializeOwned>(
    buf: &mut BytesMut,
) -> Result<Option<T>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    let value = rmp_serde::from_slice(&payload)?;

    Ok(Some(value))
}

fn decode_value<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    let value = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?;
    Ok(value)
}

/// Encode a client event to bytes.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded event
///
/// # Errors
///
/// Returns an error if the event is too large or encoding fails.
pub fn encode_client(event: &ClientEvent) -> Result<Bytes, ProtocolError> {
    encode_value(event)
}

/// Encode a server event to bytes.
///
/// # Errors
///
/// Returns an error if the event is too large or encoding fails.
pub fn encode_server(event: &ServerEvent) -> Result<Bytes, ProtocolError> {
    encode_value(event)
}

/// Decode a client event from a complete buffer.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode_client(data: &[u8]) -> Result<ClientEvent, ProtocolError> {
    decode_value(data)
}

/// Decode a server event from a complete buffer.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode_server(data: &[u8]) -> Result<ServerEvent, ProtocolError> {
    decode_value(data)
}

/// Try to decode a client event from a streaming buffer, advancing it on
/// success.
///
/// Returns `Ok(Some(event))` if a complete frame was decoded, `Ok(None)` if
/// more data is needed.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_client_from(buf: &mut BytesMut) -> Result<Option<ClientEvent>, ProtocolError> {
    decode_value_from(buf)
}

/// Try to decode a server event from a streaming buffer, advancing it on
/// success.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_server_from(buf: &mut BytesMut) -> Result<Option<ServerEvent>, ProtocolError> {
    decode_value_from(buf)
}
