//! # Duplex Audio Session Engine
//!
//! Low-latency duplex session engine: plays a reference track and a
//! previously recorded vocal overlay while capturing live microphone
//! input, with sample-accurate timing correlation between the streams.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      REAL-TIME (hardware clocked)                │
//! │                                                                  │
//! │  ┌───────────────┐  mic SPSC ring   ┌──────────────────────────┐ │
//! │  │ Input callback├─────────────────►│  Output callback         │ │
//! │  └───────────────┘                  │  (sole real-time entry)  │ │
//! │                                     │   1. pull mic frames     │ │
//! │   TrackStore ──(MixView copy)──────►│   2. advance SessionClock│ │
//! │   MixParams ──(atomic gains)───────►│   3. RenderMixer -> out  │ │
//! │                                     │   4. f32 -> PCM16        │ │
//! │                                     │   5. push meta + payload │ │
//! │                                     └──────────┬───────────────┘ │
//! └────────────────────────────────────────────────┼─────────────────┘
//!                         meta ring + pcm ring     │ notify
//! ┌────────────────────────────────────────────────▼─────────────────┐
//! │                      NON-REAL-TIME                               │
//! │  ┌─────────────────────────────────────────────────────────────┐ │
//! │  │ DispatchWorker: drain (meta, payload) pairs in lock-step,   │ │
//! │  │ deliver to TakeWriter (WAV) or the registered consumer      │ │
//! │  └─────────────────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The audio callback never blocks on a lock held by non-real-time code,
//! never allocates on the steady-state path and never calls into the
//! consumer; everything slow happens on the dispatch worker. Capture data
//! is dropped, never queued unboundedly, when the rings fill.

pub mod audio;
pub mod clock;
pub mod codec;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod mixer;
pub mod tracks;

pub use clock::{SessionClock, SessionSnapshot};
pub use dispatch::CaptureConsumer;
pub use engine::{Engine, Transport};
pub use error::{Error, Result};

/// Engine-wide constants
pub mod constants {
    /// Default sample rate for sessions
    pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Capacity of the PCM payload ring in bytes (1 MiB)
    pub const PCM_RING_BYTES: usize = 1 << 20;

    /// Capacity of the capture metadata ring in bytes (64 KiB)
    pub const META_RING_BYTES: usize = 1 << 16;

    /// Mic feed ring capacity in frames
    pub const MIC_RING_FRAMES: usize = 1 << 15;

    /// Upper bound on samples handled per output callback
    pub const MAX_CALLBACK_SAMPLES: usize = 1 << 14;

    /// Dispatch worker wake timeout; bounds the delay of a missed wake
    pub const WORKER_WAKE_TIMEOUT_MS: u64 = 50;

    /// Poll interval of the thread that keeps the hardware streams alive
    pub const STREAM_POLL_INTERVAL_MS: u64 = 10;
}
