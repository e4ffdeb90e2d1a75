//! Registry of audio sources and the sum-excluding-one mix.
//!
//! Each source is a client's incoming sample ring. Every audio render
//! worker mixes concurrently, so the slot table sits behind a reader lock;
//! add and remove take the writer side.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::buffer::SampleRing;
use crate::error::{EngineError, Result};

/// Largest mix request served in one call (one Opus frame).
pub const MIX_CHUNK_MAX: usize = 960;

struct MixerSource {
    id: u32,
    ring: Arc<SampleRing>,
}

/// Audio mixer: slot table of (client id, sample ring).
///
/// Output policy: the summed mix is clipped to ±1.0 before it reaches the
/// encoder. Opus survives moderate overshoot, but clipping here keeps the
/// fanout deterministic across encoder versions. The naive diagnostic mode
/// skips the clip stage.
pub struct AudioMixer {
    slots: RwLock<Vec<MixerSource>>,
    max_sources: usize,
    naive: bool,
}

impl AudioMixer {
    pub fn new(max_sources: usize, naive: bool) -> Self {
        Self {
            slots: RwLock::new(Vec::with_capacity(max_sources)),
            max_sources,
            naive,
        }
    }

    /// Register a source. Fails on duplicate id or a full table.
    pub fn add_source(&self, id: u32, ring: Arc<SampleRing>) -> Result<()> {
        let mut slots = self.slots.write();
        if slots.iter().any(|s| s.id == id) {
            return Err(EngineError::InvalidParam(format!(
                "mixer source {id} already registered"
            )));
        }
        if slots.len() >= self.max_sources {
            return Err(EngineError::ResourceExhausted(format!(
                "mixer full ({} sources)",
                self.max_sources
            )));
        }
        slots.push(MixerSource { id, ring });
        Ok(())
    }

    /// Unregister a source. Idempotent.
    pub fn remove_source(&self, id: u32) {
        self.slots.write().retain(|s| s.id != id);
    }

    pub fn has_source(&self, id: u32) -> bool {
        self.slots.read().iter().any(|s| s.id == id)
    }

    pub fn source_count(&self) -> usize {
        self.slots.read().len()
    }

    /// Sum up to `dst.len()` samples from every source except `exclude_id`
    /// into `dst` (element-wise add over whatever `dst` already holds).
    /// Returns the maximum sample count any single source provided.
    ///
    /// Requests longer than [`MIX_CHUNK_MAX`] are truncated to it.
    pub fn mix_excluding(&self, dst: &mut [f32], exclude_id: u32) -> usize {
        let want = dst.len().min(MIX_CHUNK_MAX);
        let mut scratch = [0.0f32; MIX_CHUNK_MAX];
        let mut max_read = 0usize;

        let slots = self.slots.read();
        for source in slots.iter().filter(|s| s.id != exclude_id) {
            let n = source.ring.read(&mut scratch[..want]);
            for i in 0..n {
                dst[i] += scratch[i];
            }
            max_read = max_read.max(n);
        }
        drop(slots);

        if !self.naive {
            for s in dst[..max_read].iter_mut() {
                *s = s.clamp(-1.0, 1.0);
            }
        }
        max_read
    }
}
