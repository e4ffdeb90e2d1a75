//! Audio mixing and Opus transcode for the outbound path.

pub mod mixer;
pub mod opus;

pub use mixer::AudioMixer;
pub use opus::{AudioDecoder, AudioEncoder, OPUS_FRAME_SAMPLES, SAMPLE_RATE};
