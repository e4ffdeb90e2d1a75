//! Bounded FIFO of outbound packets with shutdown semantics.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{EngineError, Result};

/// Bounded FIFO queue. Enqueue copies the payload; the queue owns it.
pub struct PacketQueue {
    inner: Mutex<VecDeque<Vec<u8>>>,
    not_full: Condvar,
    not_empty: Condvar,
    max: usize,
    shut: AtomicBool,
}

impl PacketQueue {
    pub fn new(max: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(max.min(64))),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            max,
            shut: AtomicBool::new(false),
        }
    }

    /// Non-blocking enqueue. Fails with `QueueFull` at capacity and
    /// `QueueShutdown` after shutdown.
    pub fn enqueue(&self, payload: &[u8]) -> Result<()> {
        if self.shut.load(Ordering::Acquire) {
            return Err(EngineError::QueueShutdown);
        }
        let mut queue = self.inner.lock();
        if queue.len() >= self.max {
            return Err(EngineError::QueueFull);
        }
        queue.push_back(payload.to_vec());
        drop(queue);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocking enqueue for background producers. Waits up to `timeout`
    /// for space; shutdown wakes the wait immediately.
    pub fn enqueue_wait(&self, payload: &[u8], timeout: Duration) -> Result<()> {
        let deadline = std::time::Instant::now() + timeout;
        let mut queue = self.inner.lock();
        while queue.len() >= self.max {
            if self.shut.load(Ordering::Acquire) {
                return Err(EngineError::QueueShutdown);
            }
            if self.not_full.wait_until(&mut queue, deadline).timed_out() {
                return Err(EngineError::QueueFull);
            }
        }
        if self.shut.load(Ordering::Acquire) {
            return Err(EngineError::QueueShutdown);
        }
        queue.push_back(payload.to_vec());
        drop(queue);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Non-blocking pop of the oldest packet. After shutdown the remaining
    /// contents still drain in order.
    pub fn try_dequeue(&self) -> Option<Vec<u8>> {
        let mut queue = self.inner.lock();
        let packet = queue.pop_front();
        if packet.is_some() {
            drop(queue);
            self.not_full.notify_one();
        }
        packet
    }

    /// Blocking pop with a timeout. Returns `None` on timeout or when shut
    /// down with nothing left to drain.
    pub fn dequeue_wait(&self, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = std::time::Instant::now() + timeout;
        let mut queue = self.inner.lock();
        loop {
            if let Some(packet) = queue.pop_front() {
                drop(queue);
                self.not_full.notify_one();
                return Some(packet);
            }
            if self.shut.load(Ordering::Acquire) {
                return None;
            }
            if self.not_empty.wait_until(&mut queue, deadline).timed_out() {
                return None;
            }
        }
    }

    /// Wake all waiters; subsequent enqueues fail with `QueueShutdown`.
    pub fn shutdown(&self) {
        self.shut.store(true, Ordering::Release);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shut.load(Ordering::Acquire)
    }

    /// Exact current depth.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_order() {
        let queue = PacketQueue::new(4);
        queue.enqueue(b"a").unwrap();
        queue.enqueue(b"b").unwrap();
        queue.enqueue(b"c").unwrap();
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_dequeue().unwrap(), b"a");
        assert_eq!(queue.try_dequeue().unwrap(), b"b");
        assert_eq!(queue.try_dequeue().unwrap(), b"c");
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn test_full_queue_rejects() {
        let queue = PacketQueue::new(2);
        queue.enqueue(b"a").unwrap();
        queue.enqueue(b"b").unwrap();
        assert!(matches!(queue.enqueue(b"c"), Err(EngineError::QueueFull)));
    }

    #[test]
    fn test_shutdown_rejects_enqueue_but_drains() {
        let queue = PacketQueue::new(4);
        queue.enqueue(b"left over").unwrap();
        queue.shutdown();
        assert!(matches!(
            queue.enqueue(b"x"),
            Err(EngineError::QueueShutdown)
        ));
        assert_eq!(queue.try_dequeue().unwrap(), b"left over");
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn test_shutdown_wakes_blocked_dequeue() {
        let queue = Arc::new(PacketQueue::new(4));
        let waiter = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.dequeue_wait(Duration::from_secs(10)))
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.shutdown();
        assert!(waiter.join().unwrap().is_none());
    }

    #[test]
    fn test_enqueue_wait_times_out_when_full() {
        let queue = PacketQueue::new(1);
        queue.enqueue(b"a").unwrap();
        assert!(matches!(
            queue.enqueue_wait(b"b", Duration::from_millis(30)),
            Err(EngineError::QueueFull)
        ));
    }
}
