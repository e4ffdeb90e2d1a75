//! Video render worker: one per client, compositing the grid and encoding
//! ASCII for that client's terminal at its requested rate.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::client::Client;
use crate::server::ServerContext;
use crate::timing::{monotonic_ns, TickClock, TickWait};
use crate::video::{ascii, Compositor};

/// Commit hashes cover at most this many leading bytes of a frame.
const HASH_PREFIX_LEN: usize = 1000;

pub fn video_loop(ctx: Arc<ServerContext>, client: Arc<Client>) {
    let id = client.id();
    let cancel = || ctx.should_exit() || client.halted();
    let mut compositor = Compositor::new();
    let mut clock = TickClock::from_rate(ctx.config.video_fps);
    let mut last_hash: Option<u32> = None;

    // Rate bookkeeping for the periodic debug line.
    let mut window_start = Instant::now();
    let mut window_frames = 0u32;
    log::debug!("video worker up for client {id}");

    loop {
        if cancel() {
            break;
        }
        let fps = if client.has_caps() {
            client.target_fps()
        } else {
            ctx.config.video_fps
        };
        clock.set_rate(fps);
        if clock.wait(&cancel) == TickWait::Cancelled {
            break;
        }

        // Capture before the heavy work so pacing stays monotone under
        // jitter.
        let t = monotonic_ns();
        let (term_w, term_h) = client.term_size();

        if !ctx.registry.any_sending_video() {
            continue;
        }
        let Some(frame) = compositor.compose(&ctx.registry, term_w, term_h, ctx.config.char_aspect)
        else {
            continue;
        };
        client.set_grid_sources(frame.source_count);

        let caps = client.caps();
        let rendered = ascii::render_for_terminal(
            &frame.image,
            term_w,
            term_h,
            caps.color,
            caps.mode,
            &caps.palette,
            ctx.config.char_aspect,
        );
        compositor.release(frame);

        let hash = crc32fast::hash(&rendered[..rendered.len().min(HASH_PREFIX_LEN)]);
        if last_hash == Some(hash) {
            // Identical content: no commit, so the send path stays quiet
            // and downstream fps measurements stay honest.
            client.stats.frames_suppressed.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        match client.outgoing_video.begin_write(8 + rendered.len()) {
            Ok(mut writer) => {
                let bytes = writer.bytes();
                bytes[0..4].copy_from_slice(&term_w.to_be_bytes());
                bytes[4..8].copy_from_slice(&term_h.to_be_bytes());
                bytes[8..].copy_from_slice(&rendered);
                writer.commit(t);
                last_hash = Some(hash);
                client.stats.frames_rendered.fetch_add(1, Ordering::Relaxed);
                window_frames += 1;
            }
            Err(e) => {
                log::warn!("client {id}: rendered frame dropped: {e}");
            }
        }

        let elapsed_ns = monotonic_ns().saturating_sub(t);
        let interval_ns = clock.interval().as_nanos() as u64;
        if elapsed_ns > interval_ns + interval_ns / 2 {
            client.stats.render_lag_ticks.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "client {id}: render tick took {:.1} ms",
                elapsed_ns as f64 / 1e6
            );
        }

        if window_start.elapsed() >= Duration::from_secs(5) {
            log::trace!(
                "client {id}: {:.1} fps rendered",
                window_frames as f64 / window_start.elapsed().as_secs_f64()
            );
            window_start = Instant::now();
            window_frames = 0;
        }
    }
    log::debug!("video worker down for client {id}");
}
