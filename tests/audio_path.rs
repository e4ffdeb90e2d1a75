//! Audio fanout scenarios: mixer exclusion verified spectrally on the
//! decoded Opus output, and queue-depth convergence under load.

mod common;

use std::f32::consts::TAU;
use std::time::Duration;

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use common::{server, wait_until, TestClient};
use termchat::audio::AudioDecoder;
use termchat::protocol::decode_frame;
use termchat::protocol::packet::{build_audio_samples, PacketType};
use termchat::ServerConfig;

const SAMPLE_RATE: f32 = 48_000.0;
const FFT_LEN: usize = 8192;

/// Peak magnitude within two bins of `freq`.
fn band_peak(spectrum: &[Complex<f32>], freq: f32) -> f32 {
    let bin = (freq * FFT_LEN as f32 / SAMPLE_RATE).round() as usize;
    (bin.saturating_sub(2)..=bin + 2)
        .map(|b| spectrum[b].norm())
        .fold(0.0, f32::max)
}

fn spectrum_of(samples: &[f32]) -> Vec<Complex<f32>> {
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(FFT_LEN);
    let mut buf: Vec<Complex<f32>> = samples
        .iter()
        .take(FFT_LEN)
        .enumerate()
        .map(|(i, s)| {
            // Hann window keeps tone leakage out of distant bins.
            let w = 0.5 - 0.5 * (TAU * i as f32 / FFT_LEN as f32).cos();
            Complex { re: s * w, im: 0.0 }
        })
        .collect();
    fft.process(&mut buf);
    buf
}

#[test]
fn test_own_tone_absent_from_own_mix() {
    let ctx = server(ServerConfig::default());

    let a = TestClient::join(&ctx, "a");
    let b = TestClient::join(&ctx, "b");
    let c = TestClient::join(&ctx, "c");
    assert!(wait_until(Duration::from_secs(1), || {
        ctx.mixer.source_count() == 3
    }));

    // Unique phase-continuous tone per client, fed in 10 ms chunks. The
    // frequencies sit far apart so concurrent consumers chopping a ring
    // cannot smear one tone's energy into another's band.
    let tones = [(&a, 500.0f32), (&b, 1800.0), (&c, 2600.0)];
    let chunk = 480usize;
    let mut sample_index = 0u64;
    for _ in 0..150 {
        for (client, freq) in &tones {
            let samples: Vec<f32> = (0..chunk)
                .map(|i| {
                    let t = (sample_index + i as u64) as f32 / SAMPLE_RATE;
                    (TAU * freq * t).sin() * 0.3
                })
                .collect();
            client.peer.send_packet(
                PacketType::Audio,
                client.id,
                build_audio_samples(&samples),
            );
        }
        sample_index += chunk as u64;
        std::thread::sleep(Duration::from_millis(10));
    }

    // Decode everything the server sent to A.
    let mut decoder = AudioDecoder::new().unwrap();
    let mut pcm: Vec<f32> = Vec::new();
    for frame in a.peer.take_sent() {
        let (header, payload) = decode_frame(&frame).unwrap();
        if header.packet_type == PacketType::AudioOpusBatch {
            pcm.extend(decoder.decode_batch(payload).unwrap());
        }
    }
    assert!(
        pcm.len() >= FFT_LEN * 2,
        "only {} samples of mixed audio captured",
        pcm.len()
    );

    // Analyze a window away from the encoder warm-up.
    let spectrum = spectrum_of(&pcm[FFT_LEN / 2..]);
    let own = band_peak(&spectrum, 500.0);
    let other = band_peak(&spectrum, 1800.0).max(band_peak(&spectrum, 2600.0));

    // A's own tone must sit at least 40 dB below the peers' tones.
    assert!(
        own * 100.0 <= other,
        "own tone at {own:.6}, peers at {other:.6}: insufficient suppression"
    );

    ctx.shutdown();
}

#[test]
fn test_audio_queue_depth_converges() {
    let ctx = server(ServerConfig::default());

    let a = TestClient::join(&ctx, "a");
    let b = TestClient::join(&ctx, "b");
    assert!(wait_until(Duration::from_secs(1), || {
        ctx.mixer.source_count() == 2
    }));

    // Saturate B's inbound audio so A's worker always has material.
    for _ in 0..100 {
        let samples = vec![0.25f32; 960];
        b.peer
            .send_packet(PacketType::Audio, b.id, build_audio_samples(&samples));
        std::thread::sleep(Duration::from_millis(5));
    }

    // With the send worker draining, the bounded queue never wedges at
    // its limit.
    let alice = ctx.registry.lookup(a.id).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        alice.outgoing_audio.len() < ctx.config.audio_queue_max
    }));
    let enqueued = alice.stats.snapshot().audio_packets_enqueued;
    assert!(enqueued > 0, "no audio packets flowed");

    ctx.shutdown();
}
