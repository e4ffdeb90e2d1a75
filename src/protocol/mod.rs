//! Wire protocol: packet header framing and per-type payload codecs.

pub mod header;
pub mod packet;
pub mod stream;

pub use header::{decode_frame, encode_frame, PacketHeader, HEADER_LEN, PACKET_MAGIC};
pub use packet::PacketType;
pub use stream::FrameDeframer;
