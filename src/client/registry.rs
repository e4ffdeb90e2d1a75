//! Client registry: slot table, id index and lifecycle of the per-client
//! worker set.
//!
//! Lock ordering: the registry rwlock is strictly outermost. It is never
//! held across worker joins or transport I/O; workers reach the registry
//! only through `try_lookup` and short read-locked snapshots.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use crate::audio::{AudioEncoder, AudioMixer};
use crate::client::{Client, ClientState, WorkerSet};
use crate::error::{EngineError, Result};
use crate::protocol::{encode_frame, PacketType};
use crate::server::ServerContext;
use crate::transport::Transport;
use crate::workers;

/// Per-slot view captured under the read lock for the compositor.
pub struct SourceSnapshot {
    pub id: u32,
    pub active: bool,
    pub sending: bool,
    pub client: Arc<Client>,
}

struct RegistryInner {
    slots: Vec<Option<Arc<Client>>>,
    id_index: HashMap<u32, usize>,
    /// Ids start at 1 and never wrap within a run; 0 means "no client".
    next_id: u32,
}

/// Fixed-capacity client table.
pub struct ClientRegistry {
    inner: RwLock<RegistryInner>,
    max_clients: usize,
}

impl ClientRegistry {
    pub fn new(max_clients: usize) -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                slots: (0..max_clients).map(|_| None).collect(),
                id_index: HashMap::with_capacity(max_clients),
                next_id: 1,
            }),
            max_clients,
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_clients
    }

    /// Admit a connection: allocate a slot, construct the client in
    /// `Connecting`, spawn its four workers in the order
    /// receive -> send -> video -> audio.
    ///
    /// A full table sends a `ServerFull` notice and fails without touching
    /// any slot. A worker spawn failure unwinds completely: previously
    /// spawned workers are signalled and joined (without the lock held)
    /// before the error returns.
    pub fn add(
        &self,
        ctx: &Arc<ServerContext>,
        transport: Arc<dyn Transport>,
        peer: &str,
    ) -> Result<u32> {
        // The Opus encoder is the one fallible resource; create it first
        // so failure cannot leave a half-initialized slot.
        let encoder = AudioEncoder::new(
            ctx.config.opus_bitrate_bps,
            ctx.config.opus_application,
        )?;

        let mut inner = self.inner.write();
        let Some(slot) = inner.slots.iter().position(Option::is_none) else {
            drop(inner);
            let notice = encode_frame(PacketType::ServerFull, 0, &[]);
            if let Err(e) = transport.send(&notice) {
                log::debug!("server-full notice to {peer} failed: {e}");
            }
            transport.close();
            return Err(EngineError::ResourceExhausted(format!(
                "all {} client slots in use",
                self.max_clients
            )));
        };

        let id = inner.next_id;
        inner.next_id += 1;

        let client = Arc::new(Client::new(
            id,
            transport,
            peer.to_string(),
            ctx.config.audio_queue_max,
        ));
        inner.slots[slot] = Some(client.clone());
        inner.id_index.insert(id, slot);

        match Self::spawn_workers(ctx, &client, encoder) {
            Ok(set) => {
                client.attach_workers(set);
                drop(inner);
                log::info!("client {id} ({peer}) admitted into slot {slot}");
                Ok(id)
            }
            Err((spawned, err)) => {
                inner.slots[slot] = None;
                inner.id_index.remove(&id);
                drop(inner);

                client.advance_state(ClientState::Draining);
                client.outgoing_audio.shutdown();
                client.transport().close();
                client.incoming_video.clear();
                client.outgoing_video.clear();
                for handle in spawned {
                    let _ = handle.join();
                }
                client.advance_state(ClientState::Closed);
                log::error!("client {id} ({peer}) admission reversed: {err}");
                Err(err)
            }
        }
    }

    fn spawn_workers(
        ctx: &Arc<ServerContext>,
        client: &Arc<Client>,
        encoder: AudioEncoder,
    ) -> std::result::Result<WorkerSet, (Vec<thread::JoinHandle<()>>, EngineError)> {
        let id = client.id();
        let mut spawned: Vec<thread::JoinHandle<()>> = Vec::with_capacity(4);

        fn spawn_one(
            name: &str,
            id: u32,
            body: impl FnOnce() + Send + 'static,
        ) -> Result<thread::JoinHandle<()>> {
            thread::Builder::new()
                .name(format!("{name}-{id}"))
                .spawn(body)
                .map_err(|e| {
                    EngineError::ResourceExhausted(format!("spawning {name} worker: {e}"))
                })
        }

        {
            let (ctx, client) = (ctx.clone(), client.clone());
            match spawn_one("recv", id, move || workers::receive_loop(ctx, client)) {
                Ok(handle) => spawned.push(handle),
                Err(e) => return Err((spawned, e)),
            }
        }
        {
            let (ctx, client) = (ctx.clone(), client.clone());
            match spawn_one("send", id, move || workers::send_loop(ctx, client)) {
                Ok(handle) => spawned.push(handle),
                Err(e) => return Err((spawned, e)),
            }
        }
        {
            let (ctx, client) = (ctx.clone(), client.clone());
            match spawn_one("video", id, move || workers::video_loop(ctx, client)) {
                Ok(handle) => spawned.push(handle),
                Err(e) => return Err((spawned, e)),
            }
        }
        {
            let (ctx, client) = (ctx.clone(), client.clone());
            match spawn_one("audio", id, move || workers::audio_loop(ctx, client, encoder)) {
                Ok(handle) => spawned.push(handle),
                Err(e) => return Err((spawned, e)),
            }
        }

        let mut handles = spawned.into_iter();
        Ok(WorkerSet {
            receive: handles.next(),
            send: handles.next(),
            video: handles.next(),
            audio: handles.next(),
        })
    }

    /// Tear a client down: drain, join every worker with no lock held,
    /// then clear the slot. Returns false when the id is unknown or a
    /// removal is already in flight.
    pub fn remove(&self, mixer: &AudioMixer, id: u32) -> bool {
        let client = {
            let inner = self.inner.read();
            let Some(&slot) = inner.id_index.get(&id) else {
                return false;
            };
            match &inner.slots[slot] {
                Some(client) => client.clone(),
                None => return false,
            }
        };

        // Winning this transition makes us the one remover.
        if !client.advance_state(ClientState::Draining) {
            return false;
        }
        client.outgoing_audio.shutdown();
        client.transport().close();
        client.incoming_video.clear();
        client.outgoing_video.clear();

        // Join outside any lock; every worker observes Draining within a
        // tick and returns.
        let handles = client.take_workers();
        for handle in handles {
            if handle.join().is_err() {
                log::error!("worker for client {id} panicked during shutdown");
            }
        }

        let mut inner = self.inner.write();
        mixer.remove_source(id);
        client.incoming_audio.drain();
        client.advance_state(ClientState::Closed);
        if let Some(&slot) = inner.id_index.get(&id) {
            inner.slots[slot] = None;
        }
        inner.id_index.remove(&id);
        drop(inner);

        log::info!("client {id} removed");
        true
    }

    /// Blocking lookup. Not for worker hot paths.
    pub fn lookup(&self, id: u32) -> Option<Arc<Client>> {
        let inner = self.inner.read();
        inner
            .id_index
            .get(&id)
            .and_then(|&slot| inner.slots[slot].clone())
    }

    /// Non-blocking lookup for workers; `None` also when the lock is
    /// currently write-held.
    pub fn try_lookup(&self, id: u32) -> Option<Arc<Client>> {
        let inner = self.inner.try_read()?;
        inner
            .id_index
            .get(&id)
            .and_then(|&slot| inner.slots[slot].clone())
    }

    pub fn client_count(&self) -> usize {
        self.inner.read().id_index.len()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.inner.read().id_index.keys().copied().collect()
    }

    /// Copy the per-slot video state under the read lock; the lock is
    /// released before any frame data is touched.
    pub fn video_snapshot(&self, out: &mut Vec<SourceSnapshot>) {
        out.clear();
        let inner = self.inner.read();
        for entry in inner.slots.iter().flatten() {
            out.push(SourceSnapshot {
                id: entry.id(),
                active: entry.is_active(),
                sending: entry.is_sending_video(),
                client: entry.clone(),
            });
        }
    }

    /// Quick atomic-flag scan: is anyone currently streaming video?
    pub fn any_sending_video(&self) -> bool {
        let inner = self.inner.read();
        inner
            .slots
            .iter()
            .flatten()
            .any(|c| c.is_active() && c.is_sending_video())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::transport::memory_pair;

    fn test_ctx(max_clients: usize) -> Arc<ServerContext> {
        let config = ServerConfig {
            max_clients,
            ..Default::default()
        };
        ServerContext::new(config).unwrap()
    }

    fn admit(ctx: &Arc<ServerContext>, name: &str) -> u32 {
        let (transport, _peer) = memory_pair();
        ctx.add_client(Arc::new(transport), name).unwrap()
    }

    #[test]
    fn test_ids_are_unique_and_nonzero() {
        let ctx = test_ctx(4);
        let a = admit(&ctx, "a");
        let b = admit(&ctx, "b");
        assert_ne!(a, 0);
        assert_ne!(b, 0);
        assert_ne!(a, b);
        ctx.shutdown();
    }

    #[test]
    fn test_lookup_identity_is_stable() {
        let ctx = test_ctx(2);
        let id = admit(&ctx, "a");
        let first = ctx.registry.lookup(id).unwrap();
        let second = ctx.registry.lookup(id).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        ctx.shutdown();
    }

    #[test]
    fn test_remove_then_lookup_is_none() {
        let ctx = test_ctx(2);
        let id = admit(&ctx, "a");
        assert!(ctx.remove_client(id));
        assert!(ctx.registry.lookup(id).is_none());
        // A second removal finds nothing to do.
        assert!(!ctx.remove_client(id));
        ctx.shutdown();
    }

    #[test]
    fn test_slot_reuse_never_reuses_ids() {
        let ctx = test_ctx(1);
        let first = admit(&ctx, "a");
        assert!(ctx.remove_client(first));
        let second = admit(&ctx, "b");
        assert_ne!(first, second);
        assert_eq!(ctx.registry.client_count(), 1);
        ctx.shutdown();
    }

    #[test]
    fn test_removed_client_reaches_closed() {
        let ctx = test_ctx(1);
        let id = admit(&ctx, "a");
        let client = ctx.registry.lookup(id).unwrap();
        assert!(ctx.remove_client(id));
        assert_eq!(client.state(), ClientState::Closed);
        ctx.shutdown();
    }
}
