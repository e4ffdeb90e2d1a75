//! Per-participant state: lifecycle, terminal capabilities, media buffers
//! and worker handles.
//!
//! Hot-path fields are atomics so workers read them without taking any
//! per-client lock; the full capability record sits behind a reader lock
//! and changes only when a `ClientCapabilities` packet arrives.

pub mod registry;

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::buffer::{FrameStore, PacketQueue, SampleRing};
use crate::protocol::packet::{ColorMode, RenderMode, MAX_FRAME_HEIGHT, MAX_FRAME_WIDTH};
use crate::transport::Transport;
use crate::video::Palette;

pub use registry::{ClientRegistry, SourceSnapshot};

/// Substituted terminal width until capabilities arrive.
pub const DEFAULT_TERM_WIDTH: u32 = 80;
/// Substituted terminal height until capabilities arrive.
pub const DEFAULT_TERM_HEIGHT: u32 = 25;

/// Capacity of the incoming raw-RGB frame store: the largest frame the
/// wire validation envelope admits.
const INCOMING_VIDEO_CAPACITY: usize =
    8 + MAX_FRAME_WIDTH as usize * MAX_FRAME_HEIGHT as usize * 3;

/// Capacity of the outgoing rendered-ASCII frame store.
const OUTGOING_VIDEO_CAPACITY: usize = 8 + 4 * 1024 * 1024;

/// Incoming audio ring depth: one second of mono 48 kHz.
const AUDIO_RING_CAPACITY: usize = 48_000;

/// Client lifecycle. Transitions are monotonic:
/// Connecting -> Active -> Draining -> Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ClientState {
    Connecting = 0,
    Active = 1,
    Draining = 2,
    Closed = 3,
}

impl ClientState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Active,
            2 => Self::Draining,
            _ => Self::Closed,
        }
    }
}

/// Terminal capabilities announced by a client.
#[derive(Debug, Clone)]
pub struct TermCaps {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub color: ColorMode,
    pub mode: RenderMode,
    pub palette: Arc<Palette>,
}

impl Default for TermCaps {
    fn default() -> Self {
        Self {
            width: DEFAULT_TERM_WIDTH,
            height: DEFAULT_TERM_HEIGHT,
            fps: 60,
            color: ColorMode::Mono,
            mode: RenderMode::Foreground,
            palette: Arc::new(Palette::default_ramp()),
        }
    }
}

/// Lock-free per-client counters.
#[derive(Default)]
pub struct ClientStats {
    pub frames_received: AtomicU64,
    pub frames_rejected: AtomicU64,
    pub frames_rendered: AtomicU64,
    pub frames_suppressed: AtomicU64,
    pub frames_sent: AtomicU64,
    pub render_lag_ticks: AtomicU64,
    pub audio_packets_enqueued: AtomicU64,
    pub audio_packets_dropped: AtomicU64,
    pub clear_console_sent: AtomicU64,
    pub send_errors: AtomicU64,
}

/// Plain snapshot of [`ClientStats`] for logs and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClientStatsSnapshot {
    pub frames_received: u64,
    pub frames_rejected: u64,
    pub frames_rendered: u64,
    pub frames_suppressed: u64,
    pub frames_sent: u64,
    pub render_lag_ticks: u64,
    pub audio_packets_enqueued: u64,
    pub audio_packets_dropped: u64,
    pub clear_console_sent: u64,
    pub send_errors: u64,
}

impl ClientStats {
    pub fn snapshot(&self) -> ClientStatsSnapshot {
        ClientStatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            frames_suppressed: self.frames_suppressed.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            render_lag_ticks: self.render_lag_ticks.load(Ordering::Relaxed),
            audio_packets_enqueued: self.audio_packets_enqueued.load(Ordering::Relaxed),
            audio_packets_dropped: self.audio_packets_dropped.load(Ordering::Relaxed),
            clear_console_sent: self.clear_console_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

/// Join handles of the four per-client workers, in spawn order.
#[derive(Default)]
pub struct WorkerSet {
    pub receive: Option<JoinHandle<()>>,
    pub send: Option<JoinHandle<()>>,
    pub video: Option<JoinHandle<()>>,
    pub audio: Option<JoinHandle<()>>,
}

impl WorkerSet {
    fn take_all(&mut self) -> Vec<JoinHandle<()>> {
        [
            self.receive.take(),
            self.send.take(),
            self.video.take(),
            self.audio.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// One connected participant.
///
/// Fields drop in declaration order once the registry clears the slot:
/// video stores first, then the audio ring and queue, then the transport.
pub struct Client {
    id: u32,
    peer: String,
    transport: Arc<dyn Transport>,

    state: AtomicU8,
    has_caps: AtomicBool,
    is_sending_video: AtomicBool,
    term_width: AtomicU32,
    term_height: AtomicU32,
    target_fps: AtomicU32,
    caps: RwLock<TermCaps>,

    pub incoming_video: FrameStore,
    pub incoming_audio: Arc<SampleRing>,
    pub outgoing_video: FrameStore,
    pub outgoing_audio: PacketQueue,

    /// Source count of the last composite; the send worker compares it to
    /// decide when a `ClearConsole` must precede the next frame.
    grid_sources: AtomicUsize,

    pub stats: ClientStats,
    workers: Mutex<WorkerSet>,
}

impl Client {
    pub fn new(id: u32, transport: Arc<dyn Transport>, peer: String, audio_queue_max: usize) -> Self {
        Self {
            id,
            peer,
            transport,
            state: AtomicU8::new(ClientState::Connecting as u8),
            has_caps: AtomicBool::new(false),
            is_sending_video: AtomicBool::new(false),
            term_width: AtomicU32::new(0),
            term_height: AtomicU32::new(0),
            target_fps: AtomicU32::new(0),
            caps: RwLock::new(TermCaps::default()),
            incoming_video: FrameStore::new(INCOMING_VIDEO_CAPACITY),
            incoming_audio: Arc::new(SampleRing::new(AUDIO_RING_CAPACITY)),
            outgoing_video: FrameStore::new(OUTGOING_VIDEO_CAPACITY),
            outgoing_audio: PacketQueue::new(audio_queue_max),
            grid_sources: AtomicUsize::new(0),
            stats: ClientStats::default(),
            workers: Mutex::new(WorkerSet::default()),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn state(&self) -> ClientState {
        ClientState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Advance the lifecycle. Returns false when the client already moved
    /// to `to` or beyond; states never go backwards.
    pub fn advance_state(&self, to: ClientState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= to as u8 {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == ClientState::Active
    }

    /// Workers exit promptly once this reports true.
    pub fn halted(&self) -> bool {
        self.state() >= ClientState::Draining
    }

    pub fn is_sending_video(&self) -> bool {
        self.is_sending_video.load(Ordering::Acquire)
    }

    pub fn set_sending_video(&self, sending: bool) {
        self.is_sending_video.store(sending, Ordering::Release);
    }

    pub fn has_caps(&self) -> bool {
        self.has_caps.load(Ordering::Acquire)
    }

    /// Install capabilities. Called once by the receive worker; the
    /// atomics mirror the hot-path fields.
    pub fn set_caps(&self, caps: TermCaps) {
        self.term_width.store(caps.width, Ordering::Release);
        self.term_height.store(caps.height, Ordering::Release);
        self.target_fps.store(caps.fps, Ordering::Release);
        *self.caps.write() = caps;
        self.has_caps.store(true, Ordering::Release);
    }

    pub fn caps(&self) -> TermCaps {
        self.caps.read().clone()
    }

    /// Terminal size in character cells, substituting 80x25 until real
    /// capabilities arrive.
    pub fn term_size(&self) -> (u32, u32) {
        let w = self.term_width.load(Ordering::Acquire);
        let h = self.term_height.load(Ordering::Acquire);
        (
            if w == 0 { DEFAULT_TERM_WIDTH } else { w },
            if h == 0 { DEFAULT_TERM_HEIGHT } else { h },
        )
    }

    /// Render rate for this client, clamped to the supported envelope.
    pub fn target_fps(&self) -> u32 {
        let fps = self.target_fps.load(Ordering::Acquire);
        if fps == 0 {
            60
        } else {
            fps.clamp(1, 144)
        }
    }

    pub fn grid_sources(&self) -> usize {
        self.grid_sources.load(Ordering::Acquire)
    }

    pub fn set_grid_sources(&self, count: usize) {
        self.grid_sources.store(count, Ordering::Release);
    }

    pub fn attach_workers(&self, set: WorkerSet) {
        *self.workers.lock() = set;
    }

    /// Take every worker handle for joining. Never called from a worker.
    pub fn take_workers(&self) -> Vec<JoinHandle<()>> {
        self.workers.lock().take_all()
    }
}
