//! Packet header parsing and building.
//!
//! Every frame on the wire starts with a 24-byte big-endian header:
//! magic, packet type, payload length, payload CRC32, sender client id and
//! a reserved word.

use crate::error::{EngineError, Result};
use crate::protocol::packet::PacketType;

/// Magic constant prefixed to every packet ("TERMCHAT").
pub const PACKET_MAGIC: u64 = 0x5445_524D_4348_4154;

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 24;

/// Longest payload the framing layer accepts. Bounds memory on parse.
pub const MAX_PAYLOAD_LEN: u32 = 64 * 1024 * 1024;

/// Parsed packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Packet type discriminant.
    pub packet_type: PacketType,
    /// Payload length in bytes.
    pub length: u32,
    /// CRC32 of the payload, 0 if length == 0.
    pub crc32: u32,
    /// Sender client id, 0 for the server.
    pub client_id: u32,
}

impl PacketHeader {
    /// Parse a header from the first `HEADER_LEN` bytes of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(EngineError::BufferTooSmall {
                needed: HEADER_LEN,
                capacity: data.len(),
            });
        }

        let magic = u64::from_be_bytes(data[0..8].try_into().unwrap());
        if magic != PACKET_MAGIC {
            return Err(EngineError::InvalidParam(format!(
                "bad packet magic {magic:#018x}"
            )));
        }

        let raw_type = u16::from_be_bytes([data[8], data[9]]);
        let packet_type = PacketType::from_u16(raw_type)
            .ok_or_else(|| EngineError::InvalidParam(format!("unknown packet type {raw_type}")))?;

        let length = u32::from_be_bytes(data[10..14].try_into().unwrap());
        if length > MAX_PAYLOAD_LEN {
            return Err(EngineError::InvalidParam(format!(
                "payload length {length} exceeds limit"
            )));
        }
        let crc32 = u32::from_be_bytes(data[14..18].try_into().unwrap());
        let client_id = u32::from_be_bytes(data[18..22].try_into().unwrap());
        // Reserved u16 at [22..24] is ignored on parse.

        Ok(Self {
            packet_type,
            length,
            crc32,
            client_id,
        })
    }

    /// Encode the header into `buf`. Returns the number of bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        if buf.len() < HEADER_LEN {
            return 0;
        }
        buf[0..8].copy_from_slice(&PACKET_MAGIC.to_be_bytes());
        buf[8..10].copy_from_slice(&(self.packet_type as u16).to_be_bytes());
        buf[10..14].copy_from_slice(&self.length.to_be_bytes());
        buf[14..18].copy_from_slice(&self.crc32.to_be_bytes());
        buf[18..22].copy_from_slice(&self.client_id.to_be_bytes());
        buf[22..24].copy_from_slice(&[0, 0]);
        HEADER_LEN
    }
}

/// Build a complete wire frame: header followed by payload.
/// The CRC is computed here; 0 for empty payloads.
pub fn encode_frame(packet_type: PacketType, client_id: u32, payload: &[u8]) -> Vec<u8> {
    let crc = if payload.is_empty() {
        0
    } else {
        crc32fast::hash(payload)
    };
    let header = PacketHeader {
        packet_type,
        length: payload.len() as u32,
        crc32: crc,
        client_id,
    };

    let mut frame = vec![0u8; HEADER_LEN + payload.len()];
    header.encode(&mut frame);
    frame[HEADER_LEN..].copy_from_slice(payload);
    frame
}

/// Split a wire frame into header and payload, verifying length and CRC.
pub fn decode_frame(frame: &[u8]) -> Result<(PacketHeader, &[u8])> {
    let header = PacketHeader::parse(frame)?;
    let total = HEADER_LEN + header.length as usize;
    if frame.len() < total {
        return Err(EngineError::BufferTooSmall {
            needed: total,
            capacity: frame.len(),
        });
    }
    let payload = &frame[HEADER_LEN..total];
    if !payload.is_empty() {
        let crc = crc32fast::hash(payload);
        if crc != header.crc32 {
            return Err(EngineError::InvalidParam(format!(
                "payload CRC mismatch: header {:#010x}, computed {crc:#010x}",
                header.crc32
            )));
        }
    }
    Ok((header, payload))
}
