//! Sample-accurate session clock
//!
//! Tracks the output frame position, session identity and the first-capture
//! latency offset. All fields are individually atomic so the audio callback
//! can update them without locking; a snapshot is therefore consistent
//! per-field, not transactionally (`last_frame` may lag the capture fields
//! by one callback, which is acceptable for monitoring).

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

/// Atomic view of one session's timing state.
///
/// Mutated only by the audio callback once a session is running; read by
/// any thread via [`SessionClock::snapshot`].
pub struct SessionClock {
    /// Allocator for session ids. Never reused within the process.
    session_seq: AtomicU64,
    session_id: AtomicU64,
    session_start_frame: AtomicU64,
    first_capture_frame: AtomicU64,
    offset_frames: AtomicI64,
    /// First-capture latch; set exactly once per session.
    has_captured: AtomicBool,
    /// Output frame counter, advanced by the callback.
    frames: AtomicU64,
    /// Total frames produced by the input stream.
    input_frames: AtomicU64,
    epoch: Instant,
}

/// Point-in-time view of a session, per-field consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_id: u64,
    pub session_start_frame: u64,
    pub first_capture_frame: u64,
    pub last_frame: u64,
    /// Estimated round-trip monitoring latency in frames
    /// (`first_capture_frame - session_start_frame`).
    pub offset_frames: i64,
    pub has_captured: bool,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            session_seq: AtomicU64::new(0),
            session_id: AtomicU64::new(0),
            session_start_frame: AtomicU64::new(0),
            first_capture_frame: AtomicU64::new(0),
            offset_frames: AtomicI64::new(0),
            has_captured: AtomicBool::new(false),
            frames: AtomicU64::new(0),
            input_frames: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    /// Start a new session at the current output frame position.
    ///
    /// Allocates a fresh session id and clears the first-capture latch.
    /// Returns the new id.
    pub fn begin_session(&self) -> u64 {
        let id = self.session_seq.fetch_add(1, Ordering::AcqRel) + 1;
        self.session_id.store(id, Ordering::Release);
        self.session_start_frame
            .store(self.frames.load(Ordering::Acquire), Ordering::Release);
        self.first_capture_frame.store(0, Ordering::Release);
        self.offset_frames.store(0, Ordering::Release);
        self.has_captured.store(false, Ordering::Release);
        id
    }

    /// Current output frame position.
    pub fn position(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// Advance the output frame counter by `n` frames.
    pub fn advance(&self, n: u64) {
        self.frames.fetch_add(n, Ordering::AcqRel);
    }

    /// Reset the output and input frame counters. Callers must ensure no
    /// callback is running.
    pub fn reset_position(&self) {
        self.frames.store(0, Ordering::Release);
        self.input_frames.store(0, Ordering::Release);
    }

    /// Record that captured samples were observed at `output_frame`.
    ///
    /// The first call per session latches the frame position and computes
    /// the monitoring offset; later calls are no-ops. The latch is a single
    /// compare-and-set, so it fires exactly once even if capture events
    /// race.
    pub fn note_capture(&self, output_frame: u64) {
        if self
            .has_captured
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.first_capture_frame
                .store(output_frame, Ordering::Release);
            let start = self.session_start_frame.load(Ordering::Acquire);
            self.offset_frames
                .store(output_frame as i64 - start as i64, Ordering::Release);
        }
    }

    /// Account for frames produced by the input stream.
    pub fn add_input_frames(&self, n: u64) {
        self.input_frames.fetch_add(n, Ordering::AcqRel);
    }

    /// Absolute input frame position (total frames captured so far).
    pub fn input_position(&self) -> u64 {
        self.input_frames.load(Ordering::Acquire)
    }

    pub fn session_id(&self) -> u64 {
        self.session_id.load(Ordering::Acquire)
    }

    pub fn session_start_frame(&self) -> u64 {
        self.session_start_frame.load(Ordering::Acquire)
    }

    /// Nanoseconds since the clock was created, from a monotonic source.
    pub fn timestamp_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Per-field consistent snapshot. Capture fields are read before the
    /// frame counters, so `last_frame` may be stale by one callback
    /// relative to `first_capture_frame`.
    pub fn snapshot(&self) -> SessionSnapshot {
        let has_captured = self.has_captured.load(Ordering::Acquire);
        let first_capture_frame = self.first_capture_frame.load(Ordering::Acquire);
        let offset_frames = self.offset_frames.load(Ordering::Acquire);
        SessionSnapshot {
            session_id: self.session_id.load(Ordering::Acquire),
            session_start_frame: self.session_start_frame.load(Ordering::Acquire),
            first_capture_frame,
            last_frame: self.frames.load(Ordering::Acquire),
            offset_frames,
            has_captured,
        }
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_session_ids_monotonic() {
        let clock = SessionClock::new();
        let mut seen = Vec::new();
        for _ in 0..100 {
            let id = clock.begin_session();
            assert!(!seen.contains(&id));
            if let Some(&last) = seen.last() {
                assert!(id > last);
            }
            seen.push(id);
        }
    }

    #[test]
    fn test_offset_computation() {
        let clock = SessionClock::new();
        clock.advance(1000);
        clock.begin_session();
        assert_eq!(clock.session_start_frame(), 1000);

        // First capture observed three callbacks of 128 frames later.
        clock.advance(3 * 128);
        clock.note_capture(clock.position());

        let snap = clock.snapshot();
        assert!(snap.has_captured);
        assert_eq!(snap.first_capture_frame, 1000 + 384);
        assert_eq!(snap.offset_frames, 384);
    }

    #[test]
    fn test_latch_fires_once() {
        let clock = SessionClock::new();
        clock.begin_session();

        clock.advance(100);
        clock.note_capture(100);
        clock.advance(100);
        clock.note_capture(200);

        let snap = clock.snapshot();
        assert_eq!(snap.first_capture_frame, 100);
        assert_eq!(snap.offset_frames, 100);
    }

    #[test]
    fn test_latch_fires_once_under_contention() {
        let clock = Arc::new(SessionClock::new());
        clock.begin_session();
        clock.advance(42);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let clock = clock.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        clock.note_capture(42 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = clock.snapshot();
        assert!(snap.has_captured);
        // Whichever thread won, the latched value never changed afterwards.
        assert_eq!(snap.first_capture_frame, snap.offset_frames as u64);
        assert!(snap.first_capture_frame >= 42 && snap.first_capture_frame < 50);
    }

    #[test]
    fn test_new_session_clears_latch() {
        let clock = SessionClock::new();
        clock.begin_session();
        clock.advance(10);
        clock.note_capture(10);
        assert!(clock.snapshot().has_captured);

        clock.begin_session();
        let snap = clock.snapshot();
        assert!(!snap.has_captured);
        assert_eq!(snap.first_capture_frame, 0);
        assert_eq!(snap.session_start_frame, 10);
    }

    #[test]
    fn test_input_frames_accumulate() {
        let clock = SessionClock::new();
        clock.add_input_frames(128);
        clock.add_input_frames(128);
        assert_eq!(clock.input_position(), 256);
        clock.reset_position();
        assert_eq!(clock.input_position(), 0);
    }
}
