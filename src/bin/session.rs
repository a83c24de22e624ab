//! Session demo
//!
//! Drives the engine from the command line: list devices, record a take
//! against a reference track, or review a reference + vocal mix.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use duplex_audio_engine::{
    audio::device::list_devices,
    codec::pcm::CaptureFrame,
    constants::{DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE},
    Engine,
};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("devices") => {
            print_devices();
            Ok(())
        }
        Some("record") => {
            let reference = args.get(2).context("usage: session record <reference.wav> [take.wav] [seconds]")?;
            let take = args.get(3).cloned();
            let seconds: u64 = args.get(4).map(|s| s.parse()).transpose()?.unwrap_or(10);
            record(reference, take.as_deref(), seconds)
        }
        Some("review") => {
            let reference = args.get(2).context("usage: session review <reference.wav> <vocal.wav> [offset_frames] [seconds]")?;
            let vocal = args.get(3).context("usage: session review <reference.wav> <vocal.wav> [offset_frames] [seconds]")?;
            let offset: i64 = args.get(4).map(|s| s.parse()).transpose()?.unwrap_or(0);
            let seconds: u64 = args.get(5).map(|s| s.parse()).transpose()?.unwrap_or(10);
            review(reference, vocal, offset, seconds)
        }
        _ => {
            eprintln!("usage: session <devices|record|review> ...");
            eprintln!("  session devices");
            eprintln!("  session record <reference.wav> [take.wav] [seconds]");
            eprintln!("  session review <reference.wav> <vocal.wav> [offset_frames] [seconds]");
            Ok(())
        }
    }
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let kind = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}", device.name, kind, default_marker);
    }
    println!();
}

fn record(reference_path: &str, take_path: Option<&str>, seconds: u64) -> Result<()> {
    let engine = Engine::new();

    let reference = std::fs::read(reference_path)
        .with_context(|| format!("failed to read {reference_path}"))?;
    engine.load_reference(&reference)?;

    engine.prepare_for_record();
    engine
        .start_duplex_recording(DEFAULT_SAMPLE_RATE, DEFAULT_CHANNELS)
        .context("failed to start duplex recording")?;

    if let Some(path) = take_path {
        engine.start_take_recording(path)?;
        tracing::info!("writing take to {path}");
    } else {
        // No file sink: watch the capture stream live instead.
        engine.register_capture_consumer(Arc::new(
            |pcm: bytes::Bytes, meta: &CaptureFrame| {
                tracing::debug!(
                    frames = meta.num_frames,
                    bytes = pcm.len(),
                    session_frame = meta.session_frame,
                    "captured"
                );
            },
        ));
    }

    tracing::info!("recording for {seconds}s - sing!");
    for _ in 0..seconds {
        std::thread::sleep(Duration::from_secs(1));
        let snap = engine.snapshot();
        tracing::info!(
            frame = snap.last_frame,
            offset_frames = snap.offset_frames,
            peak = engine.last_capture_peak(),
            dropped = engine.dropped_capture_callbacks(),
            "session"
        );
        if let Some(err) = engine.take_stream_error() {
            bail!("stream failed: {err}");
        }
    }

    engine.stop();
    if take_path.is_some() {
        let frames = engine.finish_take_recording()?;
        tracing::info!(frames, "take written");
    }

    let snap = engine.snapshot();
    if snap.has_captured {
        tracing::info!(
            monitoring_offset_frames = snap.offset_frames,
            "estimated round-trip latency"
        );
    }
    Ok(())
}

fn review(reference_path: &str, vocal_path: &str, offset: i64, seconds: u64) -> Result<()> {
    let engine = Engine::new();

    let reference = std::fs::read(reference_path)
        .with_context(|| format!("failed to read {reference_path}"))?;
    engine.load_reference(&reference)?;
    let vocal =
        std::fs::read(vocal_path).with_context(|| format!("failed to read {vocal_path}"))?;
    engine.load_vocal(&vocal)?;

    engine.prepare_for_review();
    engine.set_gains(1.0, 1.0);
    engine.set_vocal_offset_frames(offset);
    engine
        .start_playback_review()
        .context("failed to start playback review")?;

    tracing::info!(offset, "reviewing for {seconds}s");
    std::thread::sleep(Duration::from_secs(seconds));

    engine.stop();
    Ok(())
}
