//! Per-source audio sample ring.
//!
//! The receive worker produces, the mixer consumes from any audio worker's
//! thread, so the ring sits behind a mutex. Producer overflow never
//! overwrites: excess samples are dropped at the tail and counted.

use parking_lot::Mutex;
use ringbuf::{
    traits::{Consumer, Observer, Producer},
    HeapRb,
};
use std::sync::atomic::{AtomicU64, Ordering};

/// Fixed-capacity f32 sample buffer with a dropped-sample counter.
pub struct SampleRing {
    rb: Mutex<HeapRb<f32>>,
    dropped: AtomicU64,
    capacity: usize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            rb: Mutex::new(HeapRb::new(capacity)),
            dropped: AtomicU64::new(0),
            capacity,
        }
    }

    /// Append samples. Whatever does not fit is dropped at the tail and
    /// counted. Returns the number of samples actually stored.
    pub fn push(&self, samples: &[f32]) -> usize {
        let written = self.rb.lock().push_slice(samples);
        if written < samples.len() {
            self.dropped
                .fetch_add((samples.len() - written) as u64, Ordering::Relaxed);
        }
        written
    }

    /// Pop up to `out.len()` samples in FIFO order. Returns the count read.
    pub fn read(&self, out: &mut [f32]) -> usize {
        self.rb.lock().pop_slice(out)
    }

    /// Samples currently buffered.
    pub fn occupied(&self) -> usize {
        self.rb.lock().occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total samples dropped at the tail since creation.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Discard all buffered samples.
    pub fn drain(&self) {
        self.rb.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_then_read_fifo() {
        let ring = SampleRing::new(8);
        assert_eq!(ring.push(&[1.0, 2.0, 3.0]), 3);
        let mut out = [0.0f32; 2];
        assert_eq!(ring.read(&mut out), 2);
        assert_eq!(out, [1.0, 2.0]);
        assert_eq!(ring.occupied(), 1);
    }

    #[test]
    fn test_overflow_drops_at_tail() {
        let ring = SampleRing::new(4);
        let samples: Vec<f32> = (0..6).map(|i| i as f32).collect();
        assert_eq!(ring.push(&samples), 4);
        assert_eq!(ring.dropped_samples(), 2);

        // The stored samples are the head of the input, not the tail.
        let mut out = [0.0f32; 4];
        assert_eq!(ring.read(&mut out), 4);
        assert_eq!(out, [0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_read_from_empty_is_zero() {
        let ring = SampleRing::new(4);
        let mut out = [0.0f32; 4];
        assert_eq!(ring.read(&mut out), 0);
    }

    #[test]
    fn test_drain_empties() {
        let ring = SampleRing::new(4);
        ring.push(&[1.0, 2.0]);
        ring.drain();
        assert_eq!(ring.occupied(), 0);
    }
}
