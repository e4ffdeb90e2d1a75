//! Server configuration recognized by the fanout engine.

use crate::error::{EngineError, Result};

/// Opus application profile for the outbound encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpusProfile {
    /// Optimized for speech.
    Voip,
    /// Optimized for general audio (default).
    Audio,
}

/// Configuration for the fanout engine.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Target video frame rate per client (1-144).
    pub video_fps: u32,
    /// Audio mix cadence in ticks per second (5-200).
    pub audio_fps: u32,
    /// Maximum simultaneous clients.
    pub max_clients: usize,
    /// Maximum depth of each client's outbound audio queue.
    pub audio_queue_max: usize,
    /// Opus encoder bitrate in bits per second.
    pub opus_bitrate_bps: i32,
    /// Opus encoder application profile.
    pub opus_application: OpusProfile,
    /// Diagnostic mode: naive sum-excluding mix without the clip stage.
    pub no_audio_mixer: bool,
    /// Visual height/width ratio of a terminal character cell.
    pub char_aspect: f32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            video_fps: 60,
            audio_fps: 100,
            max_clients: 9,
            audio_queue_max: 50,
            opus_bitrate_bps: 128_000,
            opus_application: OpusProfile::Audio,
            no_audio_mixer: false,
            char_aspect: 2.0,
        }
    }
}

impl ServerConfig {
    /// Validate ranges, returning the config unchanged on success.
    pub fn validated(self) -> Result<Self> {
        if !(1..=144).contains(&self.video_fps) {
            return Err(EngineError::InvalidParam(format!(
                "video_fps {} out of range 1-144",
                self.video_fps
            )));
        }
        if !(5..=200).contains(&self.audio_fps) {
            return Err(EngineError::InvalidParam(format!(
                "audio_fps {} out of range 5-200",
                self.audio_fps
            )));
        }
        if self.max_clients == 0 {
            return Err(EngineError::InvalidParam("max_clients must be > 0".into()));
        }
        if self.audio_queue_max == 0 {
            return Err(EngineError::InvalidParam(
                "audio_queue_max must be > 0".into(),
            ));
        }
        if self.opus_bitrate_bps <= 0 {
            return Err(EngineError::InvalidParam(format!(
                "opus_bitrate_bps {} must be positive",
                self.opus_bitrate_bps
            )));
        }
        if !self.char_aspect.is_finite() || self.char_aspect <= 0.0 {
            return Err(EngineError::InvalidParam(format!(
                "char_aspect {} must be a positive finite value",
                self.char_aspect
            )));
        }
        Ok(self)
    }
}
