//! Error types shared across the fanout engine.

use thiserror::Error;

/// Errors produced by the media fanout engine.
///
/// Worker loops treat `QueueFull`, `EncoderFail` and `DimensionsCorrupt` as
/// transient: log, drop the offending unit of work, continue. Transport
/// errors are terminal for the client that hit them.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("buffer too small: need {needed} bytes, capacity {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },

    #[error("corrupt frame dimensions: {width}x{height}")]
    DimensionsCorrupt { width: u32, height: u32 },

    #[error("queue full")]
    QueueFull,

    #[error("queue shut down")]
    QueueShutdown,

    #[error("transport closed")]
    TransportClosed,

    #[error("transport I/O error: {0}")]
    TransportIo(String),

    #[error("encoder failure: {0}")]
    EncoderFail(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl EngineError {
    /// Whether a worker loop may recover from this error by dropping the
    /// current unit of work.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::QueueFull
                | EngineError::EncoderFail(_)
                | EngineError::DimensionsCorrupt { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
