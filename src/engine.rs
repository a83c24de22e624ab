//! Session engine: transport state machine and control surface
//!
//! One `Engine` instance owns at most one active duplex session. All
//! control operations take `&self`; the engine's lifetime is owned by the
//! caller (there is no process-wide instance).

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use ringbuf::traits::{Consumer as _, Producer as _, Split};
use ringbuf::HeapRb;

use crate::audio::duplex::{DuplexStreams, StreamSpec};
use crate::clock::{SessionClock, SessionSnapshot};
use crate::codec::pcm::{CaptureEncoder, CaptureFrame, CaptureStats};
use crate::codec::wav::{decode_wav_pcm16, downmix_to_mono, TakeWriter};
use crate::constants::{
    DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE, MAX_CALLBACK_SAMPLES, META_RING_BYTES,
    MIC_RING_FRAMES, PCM_RING_BYTES,
};
use crate::dispatch::{CaptureConsumer, ConsumerSlot, DispatchChannels, DispatchWorker, TakeSlot};
use crate::error::{AudioError, Error, Result, SessionError};
use crate::mixer::{self, MixParams};
use crate::tracks::TrackStore;

/// Engine transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Transport {
    Idle = 0,
    /// Capturing microphone input while mixing only the reference track.
    DuplexRecord = 1,
    /// Mixing reference + vocal at caller-set gains and offset; no capture.
    PlaybackReview = 2,
}

impl Transport {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Transport::DuplexRecord,
            2 => Transport::PlaybackReview,
            _ => Transport::Idle,
        }
    }
}

/// Real-time duplex session engine.
///
/// Mixed output is the raw float sum of the track contributions; it is not
/// limited or clamped before reaching the hardware.
pub struct Engine {
    clock: Arc<SessionClock>,
    store: Arc<TrackStore>,
    params: Arc<MixParams>,
    channels: Arc<DispatchChannels>,
    capture_stats: Arc<CaptureStats>,
    consumer: ConsumerSlot,
    take: TakeSlot,
    running: Arc<AtomicBool>,
    state: AtomicU8,
    active_spec: Mutex<Option<StreamSpec>>,
    streams: Mutex<Option<DuplexStreams>>,
    worker: Mutex<Option<DispatchWorker>>,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SessionClock::new()),
            store: Arc::new(TrackStore::new()),
            params: Arc::new(MixParams::new()),
            channels: Arc::new(DispatchChannels::new(META_RING_BYTES, PCM_RING_BYTES)),
            capture_stats: Arc::new(CaptureStats::default()),
            consumer: Arc::new(Mutex::new(None)),
            take: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            state: AtomicU8::new(Transport::Idle as u8),
            active_spec: Mutex::new(None),
            streams: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Decode and install the reference track (PCM16 WAV, any channel
    /// count). Rejects malformed input without touching engine state.
    pub fn load_reference(&self, bytes: &[u8]) -> Result<()> {
        let track = decode_wav_pcm16(bytes)?;
        tracing::info!(
            frames = track.frames(),
            channels = track.channels,
            sample_rate = track.sample_rate,
            "reference track loaded"
        );
        self.store
            .set_reference(track.samples, track.channels, track.sample_rate);
        Ok(())
    }

    /// Decode and install the vocal track, downmixed to mono.
    pub fn load_vocal(&self, bytes: &[u8]) -> Result<()> {
        let track = decode_wav_pcm16(bytes)?;
        let mono = downmix_to_mono(&track.samples, track.channels);
        tracing::info!(
            frames = mono.len(),
            source_channels = track.channels,
            sample_rate = track.sample_rate,
            "vocal track loaded"
        );
        self.store.set_vocal(mono, track.sample_rate);
        Ok(())
    }

    /// Stop any active session and reset for recording: reference gain 1,
    /// vocal gain 0, offset 0, frame counter 0, rings cleared.
    pub fn prepare_for_record(&self) {
        self.stop();
        self.params.set_gains(1.0, 0.0);
        self.params.set_vocal_offset(0);
    }

    /// Stop any active session and reset for review playback, preserving
    /// the caller's gain and offset settings.
    pub fn prepare_for_review(&self) {
        self.stop();
    }

    /// Open input + output hardware paths, start the session clock and the
    /// dispatch worker, and begin capturing. On failure the engine remains
    /// Idle.
    pub fn start_duplex_recording(&self, sample_rate: u32, channels: u16) -> Result<()> {
        if sample_rate == 0 || channels == 0 {
            return Err(AudioError::UnsupportedConfig(format!(
                "sample_rate={sample_rate} channels={channels}"
            ))
            .into());
        }
        self.stop();
        let spec = StreamSpec {
            sample_rate,
            channels,
        };
        self.warn_on_rate_mismatch(sample_rate);

        // Mic feed: input callback -> output callback, SPSC.
        let (mut mic_prod, mut mic_cons) =
            HeapRb::<f32>::new(MIC_RING_FRAMES * channels as usize).split();

        self.running.store(true, Ordering::Release);
        let session_id = self.clock.begin_session();

        let worker = DispatchWorker::spawn(
            self.channels.clone(),
            self.running.clone(),
            self.consumer.clone(),
            self.take.clone(),
        )
        .map_err(|e| {
            self.running.store(false, Ordering::Release);
            Error::Io(e)
        })?;

        let input_cb = {
            let clock = self.clock.clone();
            let running = self.running.clone();
            let ch = channels as usize;
            move |data: &[f32]| {
                if !running.load(Ordering::Acquire) {
                    return;
                }
                let pushed = mic_prod.push_slice(data);
                clock.add_input_frames((pushed / ch) as u64);
            }
        };

        let output_cb = {
            let clock = self.clock.clone();
            let store = self.store.clone();
            let params = self.params.clone();
            let running = self.running.clone();
            let dispatch = self.channels.clone();
            let mut encoder =
                CaptureEncoder::new(MAX_CALLBACK_SAMPLES, self.capture_stats.clone());
            let mut mic_buf = vec![0.0f32; MAX_CALLBACK_SAMPLES];
            let ch = channels as usize;
            move |out: &mut [f32]| {
                if !running.load(Ordering::Acquire) {
                    out.fill(0.0);
                    return;
                }
                let num_frames = out.len() / ch;
                let start_frame = clock.position();

                // Pull whatever the input stream has produced, non-blocking.
                let want = (num_frames * ch).min(mic_buf.len());
                let got_samples = mic_cons.pop_slice(&mut mic_buf[..want]);
                let got_frames = got_samples / ch;

                let view = store.view();
                mixer::render(out, ch, start_frame, false, &view, &params);
                clock.advance(num_frames as u64);

                if got_frames > 0 {
                    clock.note_capture(start_frame);
                    let meta = CaptureFrame {
                        num_frames: got_frames as u32,
                        sample_rate,
                        channels: ch as u32,
                        output_frame_pos: start_frame,
                        input_frame_pos: clock.input_position(),
                        timestamp_nanos: clock.timestamp_nanos(),
                        session_frame: start_frame - clock.session_start_frame(),
                        session_id: clock.session_id(),
                    };
                    if encoder.encode_and_push(
                        &mic_buf[..got_samples],
                        &meta,
                        &dispatch.meta_ring,
                        &dispatch.pcm_ring,
                    ) {
                        dispatch.notify();
                    }
                }
            }
        };

        match DuplexStreams::open(spec, output_cb, Some(input_cb)) {
            Ok(streams) => {
                *self.streams.lock() = Some(streams);
                *self.worker.lock() = Some(worker);
                *self.active_spec.lock() = Some(spec);
                self.state
                    .store(Transport::DuplexRecord as u8, Ordering::Release);
                tracing::info!(session_id, sample_rate, channels, "duplex recording started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                self.channels.notify();
                worker.join();
                self.channels.clear();
                tracing::warn!("failed to start duplex recording: {e}");
                Err(e.into())
            }
        }
    }

    /// Activate only the output path and mix reference + vocal. No capture
    /// and no worker thread: nothing crosses the ring boundary.
    pub fn start_playback_review(&self) -> Result<()> {
        self.stop();
        let (reference_rate, _) = self.store.sample_rates();
        let spec = StreamSpec {
            sample_rate: if reference_rate > 0 {
                reference_rate
            } else {
                DEFAULT_SAMPLE_RATE
            },
            channels: DEFAULT_CHANNELS,
        };

        self.running.store(true, Ordering::Release);
        let session_id = self.clock.begin_session();

        let output_cb = {
            let clock = self.clock.clone();
            let store = self.store.clone();
            let params = self.params.clone();
            let running = self.running.clone();
            let ch = spec.channels as usize;
            move |out: &mut [f32]| {
                if !running.load(Ordering::Acquire) {
                    out.fill(0.0);
                    return;
                }
                let num_frames = out.len() / ch;
                let start_frame = clock.position();
                let view = store.view();
                mixer::render(out, ch, start_frame, true, &view, &params);
                clock.advance(num_frames as u64);
            }
        };

        match DuplexStreams::open(spec, output_cb, None::<fn(&[f32])>) {
            Ok(streams) => {
                *self.streams.lock() = Some(streams);
                *self.active_spec.lock() = Some(spec);
                self.state
                    .store(Transport::PlaybackReview as u8, Ordering::Release);
                tracing::info!(session_id, spec.sample_rate, "playback review started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                tracing::warn!("failed to start playback review: {e}");
                Err(e.into())
            }
        }
    }

    /// Deactivate all hardware paths, join the worker, clear the rings and
    /// reset the frame counter. No consumer callbacks occur after this
    /// returns.
    pub fn stop(&self) {
        let was_active = self.running.swap(false, Ordering::AcqRel);

        if let Some(streams) = self.streams.lock().take() {
            streams.shutdown();
        }
        self.channels.notify();
        if let Some(worker) = self.worker.lock().take() {
            worker.join();
        }

        self.channels.clear();
        self.clock.reset_position();
        *self.active_spec.lock() = None;
        self.state.store(Transport::Idle as u8, Ordering::Release);

        if was_active {
            tracing::info!("session stopped");
        }
    }

    /// Set reference and vocal gains. In DuplexRecord mode the vocal gain
    /// is ignored by the mixer regardless of this setting.
    pub fn set_gains(&self, reference: f32, vocal: f32) {
        self.params.set_gains(reference, vocal);
    }

    /// Shift the vocal track against the reference by `frames` (positive
    /// delays the vocal, negative advances it).
    pub fn set_vocal_offset_frames(&self, frames: i64) {
        self.params.set_vocal_offset(frames);
    }

    /// Per-field consistent snapshot of the current session.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.clock.snapshot()
    }

    pub fn transport(&self) -> Transport {
        Transport::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Register the receiver of captured audio. Invoked from the worker
    /// thread; delivery is suppressed while a take recording is open.
    pub fn register_capture_consumer(&self, consumer: Arc<dyn CaptureConsumer>) {
        *self.consumer.lock() = Some(consumer);
    }

    pub fn clear_capture_consumer(&self) {
        *self.consumer.lock() = None;
    }

    /// Open a take recording at `path`. While open, captured frames go
    /// exclusively to the file; the live consumer is suppressed. Does not
    /// disturb a running session; fails if a take is already open.
    pub fn start_take_recording<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut slot = self.take.lock();
        if slot.is_some() {
            return Err(SessionError::TakeAlreadyOpen.into());
        }
        let spec = self.active_spec.lock().unwrap_or(StreamSpec {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
        });
        let writer = TakeWriter::create(path.as_ref(), spec.sample_rate, spec.channels)?;
        tracing::info!(path = %path.as_ref().display(), "take recording started");
        *slot = Some(writer);
        Ok(())
    }

    /// Close the open take recording, finalizing the container header.
    /// Returns the number of frames written.
    pub fn finish_take_recording(&self) -> Result<u64> {
        let writer = self
            .take
            .lock()
            .take()
            .ok_or(SessionError::NoActiveTake)?;
        let frames = writer.frames_written();
        writer.finalize()?;
        tracing::info!(frames, "take recording finished");
        Ok(frames)
    }

    /// Peak absolute amplitude of the most recent captured callback.
    pub fn last_capture_peak(&self) -> f32 {
        self.capture_stats.last_peak()
    }

    /// Callbacks whose capture was dropped because a ring was full.
    pub fn dropped_capture_callbacks(&self) -> u64 {
        self.capture_stats.dropped_callbacks()
    }

    /// Most recent asynchronous hardware stream error, if any.
    pub fn take_stream_error(&self) -> Option<AudioError> {
        self.streams.lock().as_ref().and_then(|s| s.take_error())
    }

    fn warn_on_rate_mismatch(&self, session_rate: u32) {
        let (reference_rate, vocal_rate) = self.store.sample_rates();
        for (name, rate) in [("reference", reference_rate), ("vocal", vocal_rate)] {
            if rate != 0 && rate != session_rate {
                // The engine never resamples; mismatched tracks play at the
                // wrong pitch.
                tracing::warn!(track = name, track_rate = rate, session_rate, "sample rate mismatch");
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
        if let Some(writer) = self.take.lock().take() {
            let _ = writer.finalize();
        }
    }
}
