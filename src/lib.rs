//! termchat: per-client real-time media fanout engine for a terminal
//! video chat server.
//!
//! Every connected participant streams webcam RGB and microphone PCM in;
//! the engine composites everyone's video into a per-recipient grid,
//! renders it as ASCII for that recipient's terminal, mixes
//! everyone-but-me audio through Opus, and streams both back at fixed
//! real-time rates. Four workers per client (receive, send, video render,
//! audio render) run as OS threads coordinated through atomics, a
//! strictly ordered lock set and latest-wins frame stores.

pub mod audio;
pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod timing;
pub mod transport;
pub mod video;
pub mod workers;

pub use client::{Client, ClientRegistry, ClientState, TermCaps};
pub use config::{OpusProfile, ServerConfig};
pub use error::{EngineError, Result};
pub use server::ServerContext;
pub use transport::{memory_pair, Inbound, MemoryPeer, MemoryTransport, Transport};
