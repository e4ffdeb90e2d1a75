//! Receive worker: parses one inbound packet at a time into the client's
//! media stores.
//!
//! Transport EOF or error is terminal for the client; the worker asks the
//! supervisor to run the removal and returns, so it is never joined from
//! its own thread.

use std::sync::Arc;

use crate::audio::AudioDecoder;
use crate::client::{Client, ClientState, TermCaps};
use crate::error::Result;
use crate::protocol::packet::{
    self, parse_audio_samples, parse_capabilities, parse_image_frame,
};
use crate::protocol::{encode_frame, PacketType};
use crate::server::ServerContext;
use crate::timing::monotonic_ns;
use crate::transport::Inbound;
use crate::video::Palette;

pub fn receive_loop(ctx: Arc<ServerContext>, client: Arc<Client>) {
    let id = client.id();
    let mut decoder: Option<AudioDecoder> = None;
    log::debug!("receive worker up for client {id}");

    loop {
        if ctx.should_exit() || client.halted() {
            break;
        }
        match client.transport().recv_packet() {
            Ok(Inbound::Idle) => continue,
            Ok(Inbound::Eof) => {
                log::info!("client {id} hung up");
                ctx.request_remove(id);
                break;
            }
            Err(e) => {
                log::warn!("client {id} transport error: {e}");
                ctx.request_remove(id);
                break;
            }
            Ok(Inbound::Packet {
                packet_type,
                payload,
                ..
            }) => {
                if let Err(e) = handle_packet(&ctx, &client, packet_type, &payload, &mut decoder) {
                    if e.is_transient() {
                        log::debug!("client {id}: dropped {packet_type:?}: {e}");
                    } else {
                        log::warn!("client {id}: fatal on {packet_type:?}: {e}");
                        ctx.request_remove(id);
                        break;
                    }
                }
            }
        }
    }
    log::debug!("receive worker down for client {id}");
}

fn handle_packet(
    ctx: &ServerContext,
    client: &Arc<Client>,
    packet_type: PacketType,
    payload: &[u8],
    decoder: &mut Option<AudioDecoder>,
) -> Result<()> {
    let id = client.id();
    match packet_type {
        PacketType::ClientJoin => {
            if client.advance_state(ClientState::Active) {
                let name = String::from_utf8_lossy(payload);
                log::info!("client {id} joined as {:?}", name.trim());
                if let Err(e) = ctx.mixer.add_source(id, client.incoming_audio.clone()) {
                    log::warn!("client {id} not mixed: {e}");
                }
            }
        }
        PacketType::StreamStart => client.set_sending_video(true),
        PacketType::StreamStop => client.set_sending_video(false),
        PacketType::ImageFrame => match parse_image_frame(payload) {
            Ok(frame) => {
                // Stored with the dimension prefix, trailing bytes cut;
                // the compositor re-validates on read.
                let expected = 8 + frame.rgb.len();
                client
                    .incoming_video
                    .write_frame(&payload[..expected], monotonic_ns())?;
                client
                    .stats
                    .frames_received
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            Err(e) => {
                client
                    .stats
                    .frames_rejected
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                log::debug!("client {id}: rejected inbound frame: {e}");
            }
        },
        PacketType::Audio => {
            let samples = parse_audio_samples(payload);
            client.incoming_audio.push(&samples);
        }
        PacketType::AudioOpusBatch => {
            if decoder.is_none() {
                *decoder = Some(AudioDecoder::new()?);
            }
            let pcm = decoder
                .as_mut()
                .unwrap()
                .decode_batch(payload)?;
            client.incoming_audio.push(&pcm);
        }
        PacketType::ClientCapabilities => {
            let caps = parse_capabilities(payload)?;
            let palette = if caps.palette.is_empty() {
                Arc::new(Palette::default_ramp())
            } else {
                match Palette::from_ramp(&caps.palette) {
                    Ok(p) => Arc::new(p),
                    Err(e) => {
                        log::warn!("client {id}: bad palette, using default: {e}");
                        Arc::new(Palette::default_ramp())
                    }
                }
            };
            client.set_caps(TermCaps {
                width: caps.width.min(packet::MAX_FRAME_WIDTH),
                height: caps.height.min(packet::MAX_FRAME_HEIGHT),
                fps: caps.fps,
                color: caps.color,
                mode: caps.mode,
                palette,
            });
            log::debug!(
                "client {id} capabilities: {}x{} {:?}/{:?} at {} fps",
                caps.width,
                caps.height,
                caps.color,
                caps.mode,
                caps.fps
            );
        }
        PacketType::Ping => {
            let pong = encode_frame(PacketType::Pong, 0, &[]);
            client.transport().send(&pong)?;
        }
        PacketType::Pong => {}
        other => log::debug!("client {id}: ignoring unexpected {other:?}"),
    }
    Ok(())
}
