//! Opus encode/decode wrappers for the 48 kHz mono media path.

use crate::config::OpusProfile;
use crate::error::{EngineError, Result};
use crate::protocol::packet;

/// Engine-wide audio sample rate.
pub const SAMPLE_RATE: u32 = 48_000;

/// Samples per Opus frame (20 ms mono at 48 kHz).
pub const OPUS_FRAME_SAMPLES: usize = 960;

/// Opus frame duration advertised in batch headers.
pub const OPUS_FRAME_MS: u32 = 20;

/// Hard ceiling on a single encoded Opus frame (RFC 6716).
const MAX_OPUS_FRAME_BYTES: usize = 1275;

/// Outbound Opus encoder for one client, plus its packet scratch.
pub struct AudioEncoder {
    encoder: opus::Encoder,
    out: [u8; MAX_OPUS_FRAME_BYTES],
}

impl AudioEncoder {
    /// Create an encoder. Failure here is an initialization failure and is
    /// treated as fatal by the caller, not retried.
    pub fn new(bitrate_bps: i32, profile: OpusProfile) -> Result<Self> {
        let application = match profile {
            OpusProfile::Voip => opus::Application::Voip,
            OpusProfile::Audio => opus::Application::Audio,
        };
        let mut encoder = opus::Encoder::new(SAMPLE_RATE, opus::Channels::Mono, application)
            .map_err(|e| EngineError::EncoderFail(format!("opus encoder init: {e}")))?;
        encoder
            .set_bitrate(opus::Bitrate::Bits(bitrate_bps))
            .map_err(|e| EngineError::EncoderFail(format!("opus set_bitrate: {e}")))?;
        Ok(Self {
            encoder,
            out: [0u8; MAX_OPUS_FRAME_BYTES],
        })
    }

    /// Encode exactly one 960-sample frame into Opus bytes.
    pub fn encode_frame(&mut self, pcm: &[f32]) -> Result<&[u8]> {
        if pcm.len() != OPUS_FRAME_SAMPLES {
            return Err(EngineError::InvalidParam(format!(
                "opus frame needs {OPUS_FRAME_SAMPLES} samples, got {}",
                pcm.len()
            )));
        }
        let n = self
            .encoder
            .encode_float(pcm, &mut self.out)
            .map_err(|e| EngineError::EncoderFail(format!("opus encode: {e}")))?;
        Ok(&self.out[..n])
    }

    /// Encode one frame and wrap it in an `AudioOpusBatch` payload.
    pub fn encode_packet(&mut self, pcm: &[f32]) -> Result<Vec<u8>> {
        let bytes = self.encode_frame(pcm)?;
        Ok(packet::build_opus_batch(SAMPLE_RATE, OPUS_FRAME_MS, &[bytes]))
    }
}

/// Inbound Opus decoder for one client.
pub struct AudioDecoder {
    decoder: opus::Decoder,
}

impl AudioDecoder {
    pub fn new() -> Result<Self> {
        let decoder = opus::Decoder::new(SAMPLE_RATE, opus::Channels::Mono)
            .map_err(|e| EngineError::EncoderFail(format!("opus decoder init: {e}")))?;
        Ok(Self { decoder })
    }

    /// Decode one Opus frame, appending the PCM to `out`.
    pub fn decode_frame(&mut self, frame: &[u8], out: &mut Vec<f32>) -> Result<usize> {
        let start = out.len();
        out.resize(start + OPUS_FRAME_SAMPLES, 0.0);
        let n = self
            .decoder
            .decode_float(frame, &mut out[start..], false)
            .map_err(|e| EngineError::EncoderFail(format!("opus decode: {e}")))?;
        out.truncate(start + n);
        Ok(n)
    }

    /// Decode every frame of an `AudioOpusBatch` payload into PCM.
    pub fn decode_batch(&mut self, payload: &[u8]) -> Result<Vec<f32>> {
        let batch = packet::parse_opus_batch(payload)?;
        let mut pcm = Vec::with_capacity(batch.frames.len() * OPUS_FRAME_SAMPLES);
        for frame in batch.frames {
            self.decode_frame(frame, &mut pcm)?;
        }
        Ok(pcm)
    }
}
