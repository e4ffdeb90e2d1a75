//! Incremental deframer for byte-stream transports.
//!
//! TCP-style transports deliver arbitrary chunk boundaries; the deframer
//! accumulates bytes and yields complete, CRC-verified frames. A bad magic
//! or checksum is unrecoverable for the stream and surfaces as an error.

use crate::error::Result;
use crate::protocol::header::{decode_frame, PacketHeader, HEADER_LEN};

/// Accumulates stream bytes and splits them into packets.
#[derive(Default)]
pub struct FrameDeframer {
    buf: Vec<u8>,
}

impl FrameDeframer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet consumed as frames.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame, or `None` until more bytes arrive.
    /// Errors (bad magic, oversized length, CRC mismatch) poison the
    /// stream; callers close the connection rather than resync.
    pub fn next_frame(&mut self) -> Result<Option<(PacketHeader, Vec<u8>)>> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        // Parse enforces magic and the payload length ceiling.
        let header = PacketHeader::parse(&self.buf)?;
        let total = HEADER_LEN + header.length as usize;
        if self.buf.len() < total {
            return Ok(None);
        }

        let (header, payload) = decode_frame(&self.buf[..total])?;
        let payload = payload.to_vec();
        self.buf.drain(..total);
        Ok(Some((header, payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::header::encode_frame;
    use crate::protocol::packet::PacketType;

    #[test]
    fn test_reassembles_across_chunk_boundaries() {
        let frame = encode_frame(PacketType::Audio, 3, b"payload bytes");
        let mut deframer = FrameDeframer::new();

        // Feed one byte at a time; the frame appears only when complete.
        for (i, byte) in frame.iter().enumerate() {
            deframer.extend(&[*byte]);
            let got = deframer.next_frame().unwrap();
            if i + 1 < frame.len() {
                assert!(got.is_none());
            } else {
                let (header, payload) = got.unwrap();
                assert_eq!(header.packet_type, PacketType::Audio);
                assert_eq!(payload, b"payload bytes");
            }
        }
        assert_eq!(deframer.pending(), 0);
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let mut bytes = encode_frame(PacketType::Ping, 1, &[]);
        bytes.extend_from_slice(&encode_frame(PacketType::StreamStart, 1, &[]));
        let mut deframer = FrameDeframer::new();
        deframer.extend(&bytes);

        let (first, _) = deframer.next_frame().unwrap().unwrap();
        let (second, _) = deframer.next_frame().unwrap().unwrap();
        assert_eq!(first.packet_type, PacketType::Ping);
        assert_eq!(second.packet_type, PacketType::StreamStart);
        assert!(deframer.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_bad_magic_poisons_stream() {
        let mut frame = encode_frame(PacketType::Ping, 1, &[]);
        frame[0] ^= 0xFF;
        let mut deframer = FrameDeframer::new();
        deframer.extend(&frame);
        assert!(deframer.next_frame().is_err());
    }

    #[test]
    fn test_corrupt_payload_detected() {
        let mut frame = encode_frame(PacketType::Audio, 1, b"samples");
        let last = frame.len() - 1;
        frame[last] ^= 0x01;
        let mut deframer = FrameDeframer::new();
        deframer.extend(&frame);
        assert!(deframer.next_frame().is_err());
    }
}
