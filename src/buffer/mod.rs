//! Media buffering primitives: latest-wins frame stores, bounded packet
//! queues and per-source sample rings.

pub mod double;
pub mod queue;
pub mod ring;

pub use double::{FrameMeta, FrameStore};
pub use queue::PacketQueue;
pub use ring::SampleRing;
