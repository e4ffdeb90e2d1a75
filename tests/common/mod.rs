//! Shared helpers for the end-to-end scenarios: in-memory clients and
//! polling waits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use termchat::protocol::packet::{
    build_capabilities, build_image_frame, CapabilitiesPacket, ColorMode, PacketType, RenderMode,
};
use termchat::transport::{memory_pair, MemoryPeer};
use termchat::{ServerConfig, ServerContext};

pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn server(config: ServerConfig) -> Arc<ServerContext> {
    init_logs();
    ServerContext::new(config).expect("server context")
}

pub struct TestClient {
    pub id: u32,
    pub peer: MemoryPeer,
}

impl TestClient {
    /// Connect, complete the join handshake.
    pub fn join(ctx: &Arc<ServerContext>, name: &str) -> Self {
        let (transport, peer) = memory_pair();
        let id = ctx
            .add_client(Arc::new(transport), name)
            .expect("add_client");
        peer.send_packet(PacketType::ClientJoin, id, name.as_bytes().to_vec());
        Self { id, peer }
    }

    pub fn send_caps(&self, width: u32, height: u32, color: ColorMode, mode: RenderMode) {
        let payload = build_capabilities(&CapabilitiesPacket {
            width,
            height,
            fps: 60,
            color,
            mode,
            palette: String::new(),
        });
        self.peer
            .send_packet(PacketType::ClientCapabilities, self.id, payload);
    }

    pub fn start_video(&self) {
        self.peer.send_packet(PacketType::StreamStart, self.id, vec![]);
    }

    pub fn send_rgb(&self, width: u32, height: u32, rgb: (u8, u8, u8)) {
        let mut pixels = vec![0u8; width as usize * height as usize * 3];
        for px in pixels.chunks_exact_mut(3) {
            px[0] = rgb.0;
            px[1] = rgb.1;
            px[2] = rgb.2;
        }
        let payload = build_image_frame(width, height, &pixels);
        self.peer.send_packet(PacketType::ImageFrame, self.id, payload);
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
