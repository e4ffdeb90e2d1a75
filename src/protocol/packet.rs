//! Per-type payload codecs.
//!
//! Payload layouts are big-endian on the wire except raw PCM samples,
//! which travel in native byte order.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::error::{EngineError, Result};

/// Packet type discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketType {
    /// Raw RGB frame from a client's webcam.
    ImageFrame = 1,
    /// Rendered ASCII frame from the server.
    AsciiFrame = 2,
    /// Raw PCM samples (f32, native byte order).
    Audio = 3,
    /// Opus-encoded audio frames with a batch header.
    AudioOpusBatch = 4,
    /// Tells the client to clear its terminal before the next frame.
    ClearConsole = 5,
    /// Terminal capability announcement.
    ClientCapabilities = 6,
    /// Handshake completion; promotes the client to active.
    ClientJoin = 7,
    /// Client started sending webcam video.
    StreamStart = 8,
    /// Client stopped sending webcam video.
    StreamStop = 9,
    Ping = 10,
    Pong = 11,
    /// Server rejects a connection because all slots are taken.
    ServerFull = 12,
}

impl PacketType {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(Self::ImageFrame),
            2 => Some(Self::AsciiFrame),
            3 => Some(Self::Audio),
            4 => Some(Self::AudioOpusBatch),
            5 => Some(Self::ClearConsole),
            6 => Some(Self::ClientCapabilities),
            7 => Some(Self::ClientJoin),
            8 => Some(Self::StreamStart),
            9 => Some(Self::StreamStop),
            10 => Some(Self::Ping),
            11 => Some(Self::Pong),
            12 => Some(Self::ServerFull),
            _ => None,
        }
    }
}

/// Widest image frame accepted from a client.
pub const MAX_FRAME_WIDTH: u32 = 4096;
/// Tallest image frame accepted from a client.
pub const MAX_FRAME_HEIGHT: u32 = 2160;

/// Terminal color depth announced by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Mono,
    Ansi16,
    Ansi256,
    Truecolor,
}

impl ColorMode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Mono),
            1 => Some(Self::Ansi16),
            2 => Some(Self::Ansi256),
            3 => Some(Self::Truecolor),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Mono => 0,
            Self::Ansi16 => 1,
            Self::Ansi256 => 2,
            Self::Truecolor => 3,
        }
    }
}

/// How a client renders character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Palette glyph in the foreground color.
    Foreground,
    /// Space with a background color.
    Background,
    /// Upper-half-block glyph; each cell carries two vertical pixels.
    HalfBlock,
}

impl RenderMode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Foreground),
            1 => Some(Self::Background),
            2 => Some(Self::HalfBlock),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Foreground => 0,
            Self::Background => 1,
            Self::HalfBlock => 2,
        }
    }
}

/// Reject dimensions outside the accepted envelope.
pub fn validate_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || width > MAX_FRAME_WIDTH || height == 0 || height > MAX_FRAME_HEIGHT {
        return Err(EngineError::DimensionsCorrupt { width, height });
    }
    Ok(())
}

/// Borrowed view of a validated `ImageFrame` payload.
#[derive(Debug)]
pub struct ImageFrameRef<'a> {
    pub width: u32,
    pub height: u32,
    /// Exactly `width * height * 3` RGB bytes.
    pub rgb: &'a [u8],
}

/// Parse and validate an `ImageFrame` payload.
///
/// The expected byte count is recomputed from the dimensions; a length
/// field supplied by the sender is never trusted. Trailing bytes beyond the
/// pixel data are tolerated and discarded.
pub fn parse_image_frame(payload: &[u8]) -> Result<ImageFrameRef<'_>> {
    if payload.len() < 8 {
        return Err(EngineError::BufferTooSmall {
            needed: 8,
            capacity: payload.len(),
        });
    }
    let width = u32::from_be_bytes(payload[0..4].try_into().unwrap());
    let height = u32::from_be_bytes(payload[4..8].try_into().unwrap());
    validate_dimensions(width, height)?;

    let expected = 8 + width as usize * height as usize * 3;
    if payload.len() < expected {
        return Err(EngineError::BufferTooSmall {
            needed: expected,
            capacity: payload.len(),
        });
    }
    Ok(ImageFrameRef {
        width,
        height,
        rgb: &payload[8..expected],
    })
}

/// Build an `ImageFrame` payload (test and loopback use).
pub fn build_image_frame(width: u32, height: u32, rgb: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8 + rgb.len());
    payload.extend_from_slice(&width.to_be_bytes());
    payload.extend_from_slice(&height.to_be_bytes());
    payload.extend_from_slice(rgb);
    payload
}

/// Flag bit: ASCII payload bytes are zlib-compressed.
pub const ASCII_FLAG_ZLIB: u32 = 1 << 0;

/// Payloads shorter than this are never worth deflating.
const ASCII_COMPRESS_MIN: usize = 128;

/// Build an `AsciiFrame` payload.
///
/// Header: width, height (character cells), original_size, compressed_size,
/// checksum of the uncompressed ASCII bytes, flags. The body is deflated
/// when that actually shrinks it; flag bit 0 records which form travelled.
pub fn build_ascii_frame(width: u32, height: u32, ascii: &[u8]) -> Vec<u8> {
    let checksum = crc32fast::hash(ascii);

    let mut flags = 0u32;
    let mut body: &[u8] = ascii;
    let compressed;
    if ascii.len() >= ASCII_COMPRESS_MIN {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::fast());
        // Writing to a Vec cannot fail.
        let ok = enc.write_all(ascii).is_ok();
        if ok {
            if let Ok(out) = enc.finish() {
                if out.len() < ascii.len() {
                    compressed = out;
                    body = &compressed;
                    flags |= ASCII_FLAG_ZLIB;
                }
            }
        }
    }

    let mut payload = Vec::with_capacity(24 + body.len());
    payload.extend_from_slice(&width.to_be_bytes());
    payload.extend_from_slice(&height.to_be_bytes());
    payload.extend_from_slice(&(ascii.len() as u32).to_be_bytes());
    payload.extend_from_slice(&(body.len() as u32).to_be_bytes());
    payload.extend_from_slice(&checksum.to_be_bytes());
    payload.extend_from_slice(&flags.to_be_bytes());
    payload.extend_from_slice(body);
    payload
}

/// Decoded `AsciiFrame` payload.
#[derive(Debug)]
pub struct AsciiFrame {
    pub width: u32,
    pub height: u32,
    pub flags: u32,
    pub ascii: Vec<u8>,
}

/// Parse an `AsciiFrame` payload, inflating and checksumming the body.
pub fn parse_ascii_frame(payload: &[u8]) -> Result<AsciiFrame> {
    if payload.len() < 24 {
        return Err(EngineError::BufferTooSmall {
            needed: 24,
            capacity: payload.len(),
        });
    }
    let width = u32::from_be_bytes(payload[0..4].try_into().unwrap());
    let height = u32::from_be_bytes(payload[4..8].try_into().unwrap());
    let original_size = u32::from_be_bytes(payload[8..12].try_into().unwrap()) as usize;
    let compressed_size = u32::from_be_bytes(payload[12..16].try_into().unwrap()) as usize;
    let checksum = u32::from_be_bytes(payload[16..20].try_into().unwrap());
    let flags = u32::from_be_bytes(payload[20..24].try_into().unwrap());

    if payload.len() < 24 + compressed_size {
        return Err(EngineError::BufferTooSmall {
            needed: 24 + compressed_size,
            capacity: payload.len(),
        });
    }
    let body = &payload[24..24 + compressed_size];

    let ascii = if flags & ASCII_FLAG_ZLIB != 0 {
        let mut out = Vec::with_capacity(original_size);
        ZlibDecoder::new(body)
            .read_to_end(&mut out)
            .map_err(|e| EngineError::InvalidParam(format!("zlib inflate failed: {e}")))?;
        out
    } else {
        body.to_vec()
    };

    if ascii.len() != original_size {
        return Err(EngineError::InvalidParam(format!(
            "ascii size mismatch: header {original_size}, body {}",
            ascii.len()
        )));
    }
    if crc32fast::hash(&ascii) != checksum {
        return Err(EngineError::InvalidParam("ascii checksum mismatch".into()));
    }

    Ok(AsciiFrame {
        width,
        height,
        flags,
        ascii,
    })
}

/// Build an `AudioOpusBatch` payload from encoded Opus frames.
pub fn build_opus_batch(sample_rate: u32, frame_duration_ms: u32, frames: &[&[u8]]) -> Vec<u8> {
    let total: usize = frames.iter().map(|f| f.len()).sum();
    let mut payload = Vec::with_capacity(12 + frames.len() * 2 + total);
    payload.extend_from_slice(&sample_rate.to_be_bytes());
    payload.extend_from_slice(&frame_duration_ms.to_be_bytes());
    payload.extend_from_slice(&(frames.len() as u32).to_be_bytes());
    for frame in frames {
        payload.extend_from_slice(&(frame.len() as u16).to_be_bytes());
    }
    for frame in frames {
        payload.extend_from_slice(frame);
    }
    payload
}

/// Decoded `AudioOpusBatch` header plus frame boundaries.
#[derive(Debug)]
pub struct OpusBatch<'a> {
    pub sample_rate: u32,
    pub frame_duration_ms: u32,
    pub frames: Vec<&'a [u8]>,
}

/// Parse an `AudioOpusBatch` payload.
pub fn parse_opus_batch(payload: &[u8]) -> Result<OpusBatch<'_>> {
    if payload.len() < 12 {
        return Err(EngineError::BufferTooSmall {
            needed: 12,
            capacity: payload.len(),
        });
    }
    let sample_rate = u32::from_be_bytes(payload[0..4].try_into().unwrap());
    let frame_duration_ms = u32::from_be_bytes(payload[4..8].try_into().unwrap());
    let frame_count = u32::from_be_bytes(payload[8..12].try_into().unwrap()) as usize;

    let sizes_end = 12 + frame_count * 2;
    if payload.len() < sizes_end {
        return Err(EngineError::BufferTooSmall {
            needed: sizes_end,
            capacity: payload.len(),
        });
    }

    let mut frames = Vec::with_capacity(frame_count);
    let mut offset = sizes_end;
    for i in 0..frame_count {
        let at = 12 + i * 2;
        let size = u16::from_be_bytes([payload[at], payload[at + 1]]) as usize;
        if payload.len() < offset + size {
            return Err(EngineError::BufferTooSmall {
                needed: offset + size,
                capacity: payload.len(),
            });
        }
        frames.push(&payload[offset..offset + size]);
        offset += size;
    }

    Ok(OpusBatch {
        sample_rate,
        frame_duration_ms,
        frames,
    })
}

/// Decoded `ClientCapabilities` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilitiesPacket {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub color: ColorMode,
    pub mode: RenderMode,
    /// Luminance ramp, dark to bright. Empty means "use the server default".
    pub palette: String,
}

/// Parse a `ClientCapabilities` payload.
pub fn parse_capabilities(payload: &[u8]) -> Result<CapabilitiesPacket> {
    if payload.len() < 16 {
        return Err(EngineError::BufferTooSmall {
            needed: 16,
            capacity: payload.len(),
        });
    }
    let width = u32::from_be_bytes(payload[0..4].try_into().unwrap());
    let height = u32::from_be_bytes(payload[4..8].try_into().unwrap());
    let fps = u32::from_be_bytes(payload[8..12].try_into().unwrap());
    let color = ColorMode::from_u8(payload[12])
        .ok_or_else(|| EngineError::InvalidParam(format!("unknown color mode {}", payload[12])))?;
    let mode = RenderMode::from_u8(payload[13])
        .ok_or_else(|| EngineError::InvalidParam(format!("unknown render mode {}", payload[13])))?;
    let palette_len = u16::from_be_bytes([payload[14], payload[15]]) as usize;
    if payload.len() < 16 + palette_len {
        return Err(EngineError::BufferTooSmall {
            needed: 16 + palette_len,
            capacity: payload.len(),
        });
    }
    let palette = std::str::from_utf8(&payload[16..16 + palette_len])
        .map_err(|_| EngineError::InvalidParam("palette is not valid UTF-8".into()))?
        .to_string();

    Ok(CapabilitiesPacket {
        width,
        height,
        fps,
        color,
        mode,
        palette,
    })
}

/// Build a `ClientCapabilities` payload.
pub fn build_capabilities(caps: &CapabilitiesPacket) -> Vec<u8> {
    let palette = caps.palette.as_bytes();
    let mut payload = Vec::with_capacity(16 + palette.len());
    payload.extend_from_slice(&caps.width.to_be_bytes());
    payload.extend_from_slice(&caps.height.to_be_bytes());
    payload.extend_from_slice(&caps.fps.to_be_bytes());
    payload.push(caps.color.to_u8());
    payload.push(caps.mode.to_u8());
    payload.extend_from_slice(&(palette.len() as u16).to_be_bytes());
    payload.extend_from_slice(palette);
    payload
}

/// Parse raw PCM samples (f32, native byte order). Trailing bytes that do
/// not make a whole sample are discarded.
pub fn parse_audio_samples(payload: &[u8]) -> Vec<f32> {
    payload
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Build a raw PCM payload (test and loopback use).
pub fn build_audio_samples(samples: &[f32]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(samples.len() * 4);
    for s in samples {
        payload.extend_from_slice(&s.to_ne_bytes());
    }
    payload
}
