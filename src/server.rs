//! Server-lifetime context shared by every worker.
//!
//! One `ServerContext` value owns the config, registry and mixer; workers
//! hold it through an `Arc`. There are no process-wide singletons. A
//! supervisor thread services removal requests queued by receive workers,
//! so no worker ever joins itself.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::AudioMixer;
use crate::client::ClientRegistry;
use crate::config::ServerConfig;
use crate::error::{EngineError, Result};
use crate::transport::Transport;

/// Supervisor poll period while idle.
const SUPERVISOR_TICK: Duration = Duration::from_millis(100);

/// Shared server state. Construct with [`ServerContext::new`], admit
/// clients with [`ServerContext::add_client`], and always finish with
/// [`ServerContext::shutdown`] — worker threads keep the context alive
/// until they are told to stop.
pub struct ServerContext {
    pub config: ServerConfig,
    pub registry: ClientRegistry,
    pub mixer: AudioMixer,
    should_exit: AtomicBool,
    removals: Mutex<VecDeque<u32>>,
    removals_cv: Condvar,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ServerContext {
    /// Validate the config, build the context and start the supervisor.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>> {
        let config = config.validated()?;
        let ctx = Arc::new(Self {
            registry: ClientRegistry::new(config.max_clients),
            mixer: AudioMixer::new(config.max_clients, config.no_audio_mixer),
            should_exit: AtomicBool::new(false),
            removals: Mutex::new(VecDeque::new()),
            removals_cv: Condvar::new(),
            supervisor: Mutex::new(None),
            config,
        });

        let weak = Arc::downgrade(&ctx);
        let handle = thread::Builder::new()
            .name("supervisor".into())
            .spawn(move || supervisor_loop(weak))
            .map_err(|e| EngineError::ResourceExhausted(format!("spawning supervisor: {e}")))?;
        *ctx.supervisor.lock() = Some(handle);
        Ok(ctx)
    }

    pub fn should_exit(&self) -> bool {
        self.should_exit.load(Ordering::Acquire)
    }

    /// Admit a connection and spawn its worker set.
    pub fn add_client(self: &Arc<Self>, transport: Arc<dyn Transport>, peer: &str) -> Result<u32> {
        if self.should_exit() {
            return Err(EngineError::ResourceExhausted(
                "server is shutting down".into(),
            ));
        }
        self.registry.add(self, transport, peer)
    }

    /// Remove a client synchronously. Must not be called from one of that
    /// client's own workers; they use [`ServerContext::request_remove`].
    pub fn remove_client(&self, id: u32) -> bool {
        self.registry.remove(&self.mixer, id)
    }

    /// Queue a removal for the supervisor thread.
    pub fn request_remove(&self, id: u32) {
        let mut queue = self.removals.lock();
        if !queue.contains(&id) {
            queue.push_back(id);
        }
        drop(queue);
        self.removals_cv.notify_one();
    }

    fn take_pending_removals(&self, wait: Duration) -> Vec<u32> {
        let mut queue = self.removals.lock();
        if queue.is_empty() && !self.should_exit() {
            self.removals_cv.wait_for(&mut queue, wait);
        }
        queue.drain(..).collect()
    }

    fn removals_pending(&self) -> bool {
        !self.removals.lock().is_empty()
    }

    /// Stop everything: signal all workers, drain every client, join the
    /// supervisor. Idempotent.
    pub fn shutdown(&self) {
        if self.should_exit.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("server shutting down");
        self.removals_cv.notify_all();

        for id in self.registry.ids() {
            self.remove_client(id);
        }
        if let Some(handle) = self.supervisor.lock().take() {
            if handle.join().is_err() {
                log::error!("supervisor panicked during shutdown");
            }
        }
        // Late requests from workers that raced shutdown. Drained before
        // removing so no worker blocks on the removals lock mid-join.
        let late: Vec<u32> = self.removals.lock().drain(..).collect();
        for id in late {
            self.remove_client(id);
        }
    }
}

/// Supervisor: runs deferred removals. Holds only a weak handle so an
/// abandoned context can still drop; exits once the context is gone or
/// shutdown has drained the queue.
fn supervisor_loop(ctx: Weak<ServerContext>) {
    log::debug!("supervisor up");
    loop {
        let Some(ctx) = ctx.upgrade() else {
            break;
        };
        let ids = ctx.take_pending_removals(SUPERVISOR_TICK);
        for id in ids {
            if ctx.remove_client(id) {
                log::debug!("supervisor removed client {id}");
            }
        }
        if ctx.should_exit() && !ctx.removals_pending() {
            break;
        }
    }
    log::debug!("supervisor down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory_pair;

    #[test]
    fn test_context_rejects_invalid_config() {
        let config = ServerConfig {
            max_clients: 0,
            ..Default::default()
        };
        assert!(ServerContext::new(config).is_err());
    }

    #[test]
    fn test_add_after_shutdown_fails() {
        let ctx = ServerContext::new(ServerConfig::default()).unwrap();
        ctx.shutdown();
        let (transport, _peer) = memory_pair();
        assert!(ctx.add_client(Arc::new(transport), "late").is_err());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let ctx = ServerContext::new(ServerConfig::default()).unwrap();
        ctx.shutdown();
        ctx.shutdown();
    }
}
