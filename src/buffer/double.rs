//! Double-buffered latest-wins frame store.
//!
//! A producer stages bytes into the back buffer and commits with a swap;
//! readers only ever observe a fully published front buffer. The producer
//! never waits on a slow reader: after a commit the previous front becomes
//! the new back and is safe to rewrite.

use parking_lot::{Mutex, MutexGuard};

use crate::error::{EngineError, Result};

/// Metadata of the currently published frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMeta {
    /// Payload length in bytes.
    pub len: usize,
    /// Capture timestamp, monotonic nanoseconds.
    pub timestamp_ns: u64,
    /// Commit sequence number; bumps on every commit including sentinels.
    pub seq: u64,
}

#[derive(Default)]
struct FrameBuf {
    data: Vec<u8>,
    len: usize,
    timestamp_ns: u64,
}

struct Front {
    buf: FrameBuf,
    seq: u64,
}

/// Double-buffered frame store.
///
/// Lock order: `back` before `front` (held together only inside commit).
/// Readers take `front` alone; the staging producer takes `back` alone.
pub struct FrameStore {
    back: Mutex<FrameBuf>,
    front: Mutex<Front>,
    capacity: usize,
}

/// Staged write into the back buffer. Dropping without `commit` abandons
/// the frame; the next `begin_write` reuses the buffer.
pub struct FrameWriter<'a> {
    store: &'a FrameStore,
    guard: MutexGuard<'a, FrameBuf>,
    len: usize,
}

impl FrameStore {
    /// Create a store that accepts frames up to `capacity` bytes.
    /// Buffers grow lazily toward that limit.
    pub fn new(capacity: usize) -> Self {
        Self {
            back: Mutex::new(FrameBuf::default()),
            front: Mutex::new(Front {
                buf: FrameBuf::default(),
                seq: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stage a write of exactly `len` bytes. Fails when the frame exceeds
    /// the preallocated capacity.
    pub fn begin_write(&self, len: usize) -> Result<FrameWriter<'_>> {
        if len > self.capacity {
            return Err(EngineError::BufferTooSmall {
                needed: len,
                capacity: self.capacity,
            });
        }
        let mut guard = self.back.lock();
        if guard.data.len() < len {
            guard.data.resize(len, 0);
        }
        Ok(FrameWriter {
            store: self,
            guard,
            len,
        })
    }

    /// Stage, copy and commit in one call.
    pub fn write_frame(&self, payload: &[u8], timestamp_ns: u64) -> Result<()> {
        let mut writer = self.begin_write(payload.len())?;
        writer.bytes().copy_from_slice(payload);
        writer.commit(timestamp_ns);
        Ok(())
    }

    /// Copy the latest published frame into `out`. Returns `None` while the
    /// store holds the empty sentinel. The copy happens under the front
    /// mutex, so a concurrent commit can never expose a torn frame.
    pub fn get_latest(&self, out: &mut Vec<u8>) -> Option<FrameMeta> {
        let front = self.front.lock();
        if front.buf.len == 0 {
            return None;
        }
        out.clear();
        out.extend_from_slice(&front.buf.data[..front.buf.len]);
        Some(FrameMeta {
            len: front.buf.len,
            timestamp_ns: front.buf.timestamp_ns,
            seq: front.seq,
        })
    }

    /// Metadata of the latest frame without copying the payload.
    pub fn latest_meta(&self) -> Option<FrameMeta> {
        let front = self.front.lock();
        if front.buf.len == 0 {
            return None;
        }
        Some(FrameMeta {
            len: front.buf.len,
            timestamp_ns: front.buf.timestamp_ns,
            seq: front.seq,
        })
    }

    /// Commit sequence number, including sentinel commits.
    pub fn seq(&self) -> u64 {
        self.front.lock().seq
    }

    /// Publish the empty sentinel. Readers observe "no frame" afterwards.
    pub fn clear(&self) {
        let mut front = self.front.lock();
        front.buf.len = 0;
        front.seq += 1;
    }
}

impl<'a> FrameWriter<'a> {
    /// The staged bytes, exactly as long as requested in `begin_write`.
    pub fn bytes(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.guard.data[..len]
    }

    /// Swap the staged frame in as the new front.
    pub fn commit(mut self, timestamp_ns: u64) {
        self.guard.len = self.len;
        self.guard.timestamp_ns = timestamp_ns;
        let mut front = self.store.front.lock();
        std::mem::swap(&mut *self.guard, &mut front.buf);
        front.seq += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_empty_store_has_no_frame() {
        let store = FrameStore::new(64);
        let mut out = Vec::new();
        assert!(store.get_latest(&mut out).is_none());
        assert!(store.latest_meta().is_none());
    }

    #[test]
    fn test_commit_publishes_and_bumps_seq() {
        let store = FrameStore::new(64);
        store.write_frame(b"frame-one", 100).unwrap();
        let mut out = Vec::new();
        let meta = store.get_latest(&mut out).unwrap();
        assert_eq!(out, b"frame-one");
        assert_eq!(meta.timestamp_ns, 100);
        assert_eq!(meta.seq, 1);

        store.write_frame(b"frame-two!", 200).unwrap();
        let meta = store.get_latest(&mut out).unwrap();
        assert_eq!(out, b"frame-two!");
        assert_eq!(meta.seq, 2);
    }

    #[test]
    fn test_oversize_write_rejected() {
        let store = FrameStore::new(4);
        assert!(matches!(
            store.write_frame(b"too large", 0),
            Err(EngineError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_clear_publishes_sentinel() {
        let store = FrameStore::new(64);
        store.write_frame(b"data", 1).unwrap();
        store.clear();
        let mut out = Vec::new();
        assert!(store.get_latest(&mut out).is_none());
        assert_eq!(store.seq(), 2);
    }

    #[test]
    fn test_abandoned_write_leaves_front_untouched() {
        let store = FrameStore::new(64);
        store.write_frame(b"kept", 1).unwrap();
        {
            let mut writer = store.begin_write(9).unwrap();
            writer.bytes().copy_from_slice(b"discarded");
            // dropped without commit
        }
        let mut out = Vec::new();
        store.get_latest(&mut out).unwrap();
        assert_eq!(out, b"kept");
    }

    #[test]
    fn test_latest_wins_timestamps_monotone() {
        let store = Arc::new(FrameStore::new(16));
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 1..=1000u64 {
                    store.write_frame(&i.to_be_bytes(), i).unwrap();
                }
            })
        };

        let mut out = Vec::new();
        let mut last_ts = 0u64;
        for _ in 0..2000 {
            if let Some(meta) = store.get_latest(&mut out) {
                assert!(meta.timestamp_ns >= last_ts);
                assert_eq!(out.len(), 8);
                last_ts = meta.timestamp_ns;
            }
        }
        writer.join().unwrap();

        // After the writer finishes, the final frame is observable.
        let meta = store.get_latest(&mut out).unwrap();
        assert_eq!(meta.timestamp_ns, 1000);
        assert_eq!(out, 1000u64.to_be_bytes());
    }
}
