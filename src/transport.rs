//! Transport abstraction consumed by the per-client workers.
//!
//! The engine never touches sockets; it hands fully framed packets to a
//! `Transport` and pulls parsed inbound packets back out. Receive calls
//! block with an internal timeout and report `Inbound::Idle` when it
//! expires, so workers can re-check shutdown flags.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::protocol::PacketType;

/// One inbound delivery from a transport.
#[derive(Debug)]
pub enum Inbound {
    /// A parsed packet: type, sender id, payload bytes.
    Packet {
        packet_type: PacketType,
        sender_id: u32,
        payload: Vec<u8>,
    },
    /// The peer closed the connection cleanly.
    Eof,
    /// Internal receive timeout expired with nothing to deliver.
    Idle,
}

/// Outbound sink plus inbound source for one client.
pub trait Transport: Send + Sync {
    /// Receive the next inbound packet. Blocks up to an internal timeout.
    fn recv_packet(&self) -> Result<Inbound>;

    /// Hand a fully framed packet (header + payload) to the wire.
    fn send(&self, frame: &[u8]) -> Result<()>;

    /// Close both directions. Pending and future receives observe `Eof`.
    fn close(&self);
}

/// How long a memory transport receive blocks before reporting `Idle`.
const MEM_RECV_TIMEOUT: Duration = Duration::from_millis(20);

struct MemoryShared {
    inbound: Mutex<VecDeque<Inbound>>,
    inbound_cv: Condvar,
    outbound: Mutex<Vec<Vec<u8>>>,
    closed: AtomicBool,
}

/// In-memory transport for loopback runs and tests. The server side
/// implements [`Transport`]; the [`MemoryPeer`] plays the remote client.
pub struct MemoryTransport {
    shared: Arc<MemoryShared>,
}

/// Test/loopback handle for the far end of a [`MemoryTransport`].
#[derive(Clone)]
pub struct MemoryPeer {
    shared: Arc<MemoryShared>,
}

/// Create a connected memory transport pair.
pub fn memory_pair() -> (MemoryTransport, MemoryPeer) {
    let shared = Arc::new(MemoryShared {
        inbound: Mutex::new(VecDeque::new()),
        inbound_cv: Condvar::new(),
        outbound: Mutex::new(Vec::new()),
        closed: AtomicBool::new(false),
    });
    (
        MemoryTransport {
            shared: shared.clone(),
        },
        MemoryPeer { shared },
    )
}

impl Transport for MemoryTransport {
    fn recv_packet(&self) -> Result<Inbound> {
        let mut queue = self.shared.inbound.lock();
        if let Some(packet) = queue.pop_front() {
            return Ok(packet);
        }
        if self.shared.closed.load(Ordering::Acquire) {
            return Ok(Inbound::Eof);
        }
        let _ = self
            .shared
            .inbound_cv
            .wait_for(&mut queue, MEM_RECV_TIMEOUT);
        if let Some(packet) = queue.pop_front() {
            return Ok(packet);
        }
        if self.shared.closed.load(Ordering::Acquire) {
            return Ok(Inbound::Eof);
        }
        Ok(Inbound::Idle)
    }

    fn send(&self, frame: &[u8]) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(EngineError::TransportClosed);
        }
        self.shared.outbound.lock().push(frame.to_vec());
        Ok(())
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.inbound_cv.notify_all();
    }
}

impl MemoryPeer {
    /// Inject an inbound packet as if the remote client had sent it.
    pub fn send_packet(&self, packet_type: PacketType, sender_id: u32, payload: Vec<u8>) {
        let mut queue = self.shared.inbound.lock();
        queue.push_back(Inbound::Packet {
            packet_type,
            sender_id,
            payload,
        });
        self.shared.inbound_cv.notify_one();
    }

    /// Signal a clean remote hangup.
    pub fn hang_up(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.inbound_cv.notify_all();
    }

    /// Drain every frame the server has sent so far.
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.shared.outbound.lock())
    }

    /// Number of frames the server has sent and not yet drained.
    pub fn sent_count(&self) -> usize {
        self.shared.outbound.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_pair_delivers_in_order() {
        let (transport, peer) = memory_pair();
        peer.send_packet(PacketType::Ping, 1, vec![]);
        peer.send_packet(PacketType::StreamStart, 1, vec![]);

        match transport.recv_packet().unwrap() {
            Inbound::Packet { packet_type, .. } => assert_eq!(packet_type, PacketType::Ping),
            other => panic!("unexpected: {other:?}"),
        }
        match transport.recv_packet().unwrap() {
            Inbound::Packet { packet_type, .. } => assert_eq!(packet_type, PacketType::StreamStart),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_memory_transport_idle_then_eof() {
        let (transport, peer) = memory_pair();
        assert!(matches!(transport.recv_packet().unwrap(), Inbound::Idle));
        peer.hang_up();
        assert!(matches!(transport.recv_packet().unwrap(), Inbound::Eof));
    }

    #[test]
    fn test_send_after_close_fails() {
        let (transport, _peer) = memory_pair();
        transport.close();
        assert!(matches!(
            transport.send(b"frame"),
            Err(EngineError::TransportClosed)
        ));
    }
}
