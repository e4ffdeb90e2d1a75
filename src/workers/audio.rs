//! Audio render worker: mixes everyone-but-me at the audio cadence,
//! accumulates Opus frames and queues encoded packets for the send worker.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::audio::{AudioEncoder, OPUS_FRAME_SAMPLES, SAMPLE_RATE};
use crate::client::Client;
use crate::server::ServerContext;
use crate::timing::{TickClock, TickWait};

/// Queue-depth sampling period, in ticks.
const BACKLOG_CHECK_TICKS: u64 = 100;

pub fn audio_loop(ctx: Arc<ServerContext>, client: Arc<Client>, mut encoder: AudioEncoder) {
    let id = client.id();
    let cancel = || ctx.should_exit() || client.halted();
    let mut clock = TickClock::from_rate(ctx.config.audio_fps);

    // Samples expected per tick at the configured cadence (480 at 100 Hz).
    let per_tick = (SAMPLE_RATE / ctx.config.audio_fps.max(1)) as usize;

    let mut acc = [0.0f32; OPUS_FRAME_SAMPLES];
    let mut fill = 0usize;
    let mut mix_buf = [0.0f32; OPUS_FRAME_SAMPLES];
    let mut ticks = 0u64;
    log::debug!("audio worker up for client {id}");

    loop {
        if cancel() {
            break;
        }
        let wait = clock.wait(&cancel);
        if wait == TickWait::Cancelled {
            break;
        }

        // A lagged tick mixes up to a full Opus frame to catch up; the
        // ring buffers hold what we could not take.
        let want = if wait == TickWait::Lagged {
            (per_tick * 2).min(OPUS_FRAME_SAMPLES)
        } else {
            per_tick.min(OPUS_FRAME_SAMPLES)
        };
        mix_buf[..want].fill(0.0);
        let mixed = ctx.mixer.mix_excluding(&mut mix_buf[..want], id);

        if mixed > 0 {
            // Samples beyond the accumulator capacity are dropped for this
            // tick only; un-read samples stay in the source rings.
            let take = mixed.min(OPUS_FRAME_SAMPLES - fill);
            acc[fill..fill + take].copy_from_slice(&mix_buf[..take]);
            fill += take;
        }

        if fill == OPUS_FRAME_SAMPLES {
            match encoder.encode_packet(&acc) {
                Ok(payload) => match client.outgoing_audio.enqueue(&payload) {
                    Ok(()) => {
                        client
                            .stats
                            .audio_packets_enqueued
                            .fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        client
                            .stats
                            .audio_packets_dropped
                            .fetch_add(1, Ordering::Relaxed);
                        log::debug!("client {id}: audio packet dropped: {e}");
                    }
                },
                Err(e) => log::debug!("client {id}: opus encode failed: {e}"),
            }
            fill = 0;
        }

        ticks += 1;
        if ticks % BACKLOG_CHECK_TICKS == 0 {
            let depth = client.outgoing_audio.len();
            if depth >= ctx.config.audio_queue_max {
                log::warn!(
                    "client {id}: audio backlog at {depth} packets, skipping one encode"
                );
                fill = 0;
            }
        }
    }
    log::debug!("audio worker down for client {id}");
}
