//! Send worker: drains the outbound audio queue and ships newly rendered
//! video frames, framing both for the transport.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::client::Client;
use crate::protocol::packet::build_ascii_frame;
use crate::protocol::{encode_frame, PacketType};
use crate::server::ServerContext;
use crate::timing::sleep_interruptible;

/// Video publish cadence: the store is polled every 16.667 ms regardless
/// of the client's render rate.
const VIDEO_POLL_INTERVAL: Duration = Duration::from_micros(16_667);

/// Backoff when neither path produced work.
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

pub fn send_loop(ctx: Arc<ServerContext>, client: Arc<Client>) {
    let id = client.id();
    let cancel = || ctx.should_exit() || client.halted();
    let mut scratch: Vec<u8> = Vec::new();
    let mut last_seq = 0u64;
    let mut last_sources = 0usize;
    let mut next_video = Instant::now();
    log::debug!("send worker up for client {id}");

    loop {
        if cancel() {
            break;
        }
        let mut worked = false;

        if let Some(payload) = client.outgoing_audio.try_dequeue() {
            let frame = encode_frame(PacketType::AudioOpusBatch, 0, &payload);
            if !ship(&ctx, &client, &frame) {
                break;
            }
            worked = true;
        }

        if Instant::now() >= next_video {
            next_video = Instant::now() + VIDEO_POLL_INTERVAL;
            if let Some(meta) = client.outgoing_video.get_latest(&mut scratch) {
                if meta.seq != last_seq && scratch.len() >= 8 {
                    last_seq = meta.seq;
                    let width = u32::from_be_bytes(scratch[0..4].try_into().unwrap());
                    let height = u32::from_be_bytes(scratch[4..8].try_into().unwrap());

                    // A geometry change means the client must wipe its
                    // screen before the new layout lands.
                    let sources = client.grid_sources();
                    if sources != last_sources {
                        last_sources = sources;
                        let clear = encode_frame(PacketType::ClearConsole, 0, &[]);
                        if !ship(&ctx, &client, &clear) {
                            break;
                        }
                        client
                            .stats
                            .clear_console_sent
                            .fetch_add(1, Ordering::Relaxed);
                    }

                    let payload = build_ascii_frame(width, height, &scratch[8..]);
                    let frame = encode_frame(PacketType::AsciiFrame, 0, &payload);
                    if !ship(&ctx, &client, &frame) {
                        break;
                    }
                    client.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                    worked = true;
                }
            }
        }

        if !worked {
            sleep_interruptible(IDLE_BACKOFF, &cancel);
        }
    }
    log::debug!("send worker down for client {id}");
}

/// Hand a frame to the transport. On failure the client is scheduled for
/// removal and the loop ends.
fn ship(ctx: &ServerContext, client: &Arc<Client>, frame: &[u8]) -> bool {
    match client.transport().send(frame) {
        Ok(()) => true,
        Err(e) => {
            client.stats.send_errors.fetch_add(1, Ordering::Relaxed);
            if !client.halted() {
                log::warn!("client {} send failed: {e}", client.id());
                ctx.request_remove(client.id());
            }
            false
        }
    }
}
