//! Protocol codec
//!
//! Framing for agent and depot messages.
//!
//! ## Wire Format
//! ```text
//! ┌──────────┬──────────────────┬──────────┬──────────────────────┐
//! │ Tag (1)  │ Request Id (8)   │ Len (4)  │   bincode payload    │
//! └──────────┴──────────────────┴──────────┴──────────────────────┘
//! ```
//! The tag repeats the payload's variant so a reader can reject a frame
//! from the wrong direction before decoding it.

use std::io::{Read, Write};

use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{DepotError, Result};

use super::{AgentMessage, DepotMessage, Envelope};

/// Header size: tag (1) + request id (8) + length (4)
pub const HEADER_SIZE: usize = 13;

/// Maximum payload size (64 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// A message family that can travel in a frame
pub trait WireMessage: Serialize + DeserializeOwned {
    /// Tag written in the frame header
    fn tag(&self) -> u8;

    /// Whether `tag` belongs to this family
    fn accepts_tag(tag: u8) -> bool;
}

impl WireMessage for AgentMessage {
    fn tag(&self) -> u8 {
        match self {
            AgentMessage::Register { .. } => 0x01,
            AgentMessage::AllocateIds { .. } => 0x02,
            AgentMessage::CommitBlobSeq { .. } => 0x03,
            AgentMessage::Resolve { .. } => 0x04,
            AgentMessage::PushNotifyResult { .. } => 0x05,
        }
    }

    fn accepts_tag(tag: u8) -> bool {
        (0x01..=0x05).contains(&tag)
    }
}

impl WireMessage for DepotMessage {
    fn tag(&self) -> u8 {
        match self {
            DepotMessage::RegisterResult { .. } => 0x81,
            DepotMessage::AllocateIdsResult { .. } => 0x82,
            DepotMessage::CommitBlobSeqResult { .. } => 0x83,
            DepotMessage::ResolveResult { .. } => 0x84,
            DepotMessage::PushNotify { .. } => 0x85,
        }
    }

    fn accepts_tag(tag: u8) -> bool {
        (0x81..=0x85).contains(&tag)
    }
}

// =============================================================================
// Frame Encoding/Decoding
// =============================================================================

/// Encode an envelope into one frame
pub fn encode_frame<M: WireMessage>(envelope: &Envelope<M>) -> Result<BytesMut> {
    let payload = bincode::serialize(&envelope.message)?;
    if payload.len() > MAX_PAYLOAD_SIZE as usize {
        return Err(DepotError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            payload.len(),
            MAX_PAYLOAD_SIZE
        )));
    }

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    frame.put_u8(envelope.message.tag());
    frame.put_u64(envelope.request_id);
    frame.put_u32(payload.len() as u32);
    frame.put_slice(&payload);
    Ok(frame)
}

/// Parse `(tag, request_id, payload_len)` from a frame header
fn parse_header(header: &[u8]) -> Result<(u8, u64, usize)> {
    if header.len() < HEADER_SIZE {
        return Err(DepotError::Protocol(format!(
            "Incomplete header: expected {} bytes, got {}",
            HEADER_SIZE,
            header.len()
        )));
    }

    let tag = header[0];
    let mut id = [0u8; 8];
    id.copy_from_slice(&header[1..9]);
    let payload_len = u32::from_be_bytes([header[9], header[10], header[11], header[12]]);

    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(DepotError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            payload_len, MAX_PAYLOAD_SIZE
        )));
    }

    Ok((tag, u64::from_be_bytes(id), payload_len as usize))
}

/// Decode one frame from bytes
pub fn decode_frame<M: WireMessage>(bytes: &[u8]) -> Result<Envelope<M>> {
    let (tag, request_id, payload_len) = parse_header(bytes)?;
    if !M::accepts_tag(tag) {
        return Err(DepotError::Protocol(format!(
            "Unknown message tag: 0x{:02x}",
            tag
        )));
    }

    let total_len = HEADER_SIZE + payload_len;
    if bytes.len() < total_len {
        return Err(DepotError::Protocol(format!(
            "Incomplete payload: expected {} bytes, got {}",
            total_len,
            bytes.len()
        )));
    }

    let message: M = bincode::deserialize(&bytes[HEADER_SIZE..total_len])
        .map_err(|e| DepotError::Protocol(format!("Malformed payload: {}", e)))?;
    if message.tag() != tag {
        return Err(DepotError::Protocol(format!(
            "Tag mismatch: header 0x{:02x}, payload 0x{:02x}",
            tag,
            message.tag()
        )));
    }

    Ok(Envelope::new(request_id, message))
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read a complete frame from a stream
///
/// Blocks until a complete frame is received or an error occurs
pub fn read_frame<R: Read, M: WireMessage>(reader: &mut R) -> Result<Envelope<M>> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;
    let (_, _, payload_len) = parse_header(&header)?;

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload_len);
    frame.put_slice(&header);
    frame.resize(HEADER_SIZE + payload_len, 0);
    if payload_len > 0 {
        reader.read_exact(&mut frame[HEADER_SIZE..])?;
    }

    decode_frame(&frame)
}

/// Write a frame to a stream
pub fn write_frame<W: Write, M: WireMessage>(writer: &mut W, envelope: &Envelope<M>) -> Result<()> {
    let frame = encode_frame(envelope)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}
