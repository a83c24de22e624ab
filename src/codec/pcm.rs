//! Capture transport encoding
//!
//! Converts captured float samples to 16-bit PCM, measures the per-callback
//! peak, and packages each callback's capture as a metadata record plus a
//! PCM payload pushed into their respective rings as one transactional
//! pair.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::audio::ring::SampleRing;

/// Metadata describing one callback's worth of captured audio.
///
/// Produced once per output callback that yields captured samples, consumed
/// once by the dispatch worker. `input_frame_pos` is the running count of
/// frames the input stream has produced; `output_frame_pos` is the session
/// clock's output position at the start of the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFrame {
    pub num_frames: u32,
    pub sample_rate: u32,
    pub channels: u32,
    pub output_frame_pos: u64,
    pub input_frame_pos: u64,
    pub timestamp_nanos: u64,
    /// Frame position relative to session start.
    pub session_frame: u64,
    pub session_id: u64,
}

/// Fixed wire size of an encoded [`CaptureFrame`].
pub const CAPTURE_FRAME_WIRE_LEN: usize = 52;

impl CaptureFrame {
    /// Encode as a fixed-size little-endian record.
    pub fn to_bytes(&self) -> [u8; CAPTURE_FRAME_WIRE_LEN] {
        let mut out = [0u8; CAPTURE_FRAME_WIRE_LEN];
        out[0..4].copy_from_slice(&self.num_frames.to_le_bytes());
        out[4..8].copy_from_slice(&self.sample_rate.to_le_bytes());
        out[8..12].copy_from_slice(&self.channels.to_le_bytes());
        out[12..20].copy_from_slice(&self.output_frame_pos.to_le_bytes());
        out[20..28].copy_from_slice(&self.input_frame_pos.to_le_bytes());
        out[28..36].copy_from_slice(&self.timestamp_nanos.to_le_bytes());
        out[36..44].copy_from_slice(&self.session_frame.to_le_bytes());
        out[44..52].copy_from_slice(&self.session_id.to_le_bytes());
        out
    }

    pub fn from_bytes(raw: &[u8; CAPTURE_FRAME_WIRE_LEN]) -> Self {
        let u32_at = |off: usize| u32::from_le_bytes(raw[off..off + 4].try_into().unwrap());
        let u64_at = |off: usize| u64::from_le_bytes(raw[off..off + 8].try_into().unwrap());
        Self {
            num_frames: u32_at(0),
            sample_rate: u32_at(4),
            channels: u32_at(8),
            output_frame_pos: u64_at(12),
            input_frame_pos: u64_at(20),
            timestamp_nanos: u64_at(28),
            session_frame: u64_at(36),
            session_id: u64_at(44),
        }
    }

    /// PCM payload length in bytes for this record.
    pub fn payload_len(&self) -> usize {
        self.num_frames as usize * self.channels as usize * 2
    }
}

/// Convert one float sample to 16-bit PCM: clamp to [-1, 1], then
/// round-to-nearest scaling by 32767.
#[inline]
pub fn f32_to_pcm16(x: f32) -> i16 {
    (x.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// Observability counters shared between the capture encoder (inside the
/// callback) and the control surface.
#[derive(Default)]
pub struct CaptureStats {
    /// Peak absolute amplitude of the last encoded callback, f32 bits.
    peak: AtomicU32,
    /// Callbacks whose capture was dropped because a ring was full.
    dropped: AtomicU64,
}

impl CaptureStats {
    /// Peak absolute amplitude observed in the most recent callback.
    pub fn last_peak(&self) -> f32 {
        f32::from_bits(self.peak.load(Ordering::Relaxed))
    }

    /// Number of callbacks whose capture was dropped on ring overflow.
    pub fn dropped_callbacks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Per-session capture encoder with reused scratch buffers.
///
/// Lives inside the output callback; `encode_and_push` performs no
/// allocation once the scratch buffers have grown to the callback size.
pub struct CaptureEncoder {
    /// PCM16 scratch, encoded little-endian straight into bytes.
    scratch: Vec<u8>,
    stats: std::sync::Arc<CaptureStats>,
}

impl CaptureEncoder {
    /// Create an encoder with scratch space pre-sized for
    /// `max_samples` samples per callback, publishing into `stats`.
    pub fn new(max_samples: usize, stats: std::sync::Arc<CaptureStats>) -> Self {
        Self {
            scratch: Vec::with_capacity(max_samples * 2),
            stats,
        }
    }

    /// Encode `input` to PCM16 and push `(meta, payload)` into the rings as
    /// a pair: both succeed or neither is written. Returns `false` when the
    /// pair was dropped for lack of ring space — the only error policy
    /// available without blocking the callback.
    pub fn encode_and_push(
        &mut self,
        input: &[f32],
        meta: &CaptureFrame,
        meta_ring: &SampleRing,
        pcm_ring: &SampleRing,
    ) -> bool {
        let mut peak = 0.0f32;
        self.scratch.clear();
        for &x in input {
            peak = peak.max(x.abs());
            self.scratch
                .extend_from_slice(&f32_to_pcm16(x).to_le_bytes());
        }
        self.stats.peak.store(peak.to_bits(), Ordering::Relaxed);

        // Check both rings up front: with a single producer, free space can
        // only grow between the check and the push, so both pushes succeed.
        if meta_ring.free() < CAPTURE_FRAME_WIRE_LEN || pcm_ring.free() < self.scratch.len() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        meta_ring.push(&meta.to_bytes());
        pcm_ring.push(&self.scratch);
        true
    }

    /// Shared observability counters.
    pub fn stats(&self) -> &std::sync::Arc<CaptureStats> {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_scale_conversion() {
        assert_eq!(f32_to_pcm16(1.0), 32767);
        assert_eq!(f32_to_pcm16(-1.0), -32767);
        assert_eq!(f32_to_pcm16(0.0), 0);
    }

    #[test]
    fn test_out_of_range_clamped() {
        assert_eq!(f32_to_pcm16(1.5), 32767);
        assert_eq!(f32_to_pcm16(-7.0), -32767);
    }

    #[test]
    fn test_rounding() {
        // 0.5 * 32767 = 16383.5 rounds away from zero.
        assert_eq!(f32_to_pcm16(0.5), 16384);
        assert_eq!(f32_to_pcm16(-0.5), -16384);
    }

    fn sample_meta() -> CaptureFrame {
        CaptureFrame {
            num_frames: 128,
            sample_rate: 48_000,
            channels: 2,
            output_frame_pos: 4096,
            input_frame_pos: 3968,
            timestamp_nanos: 123_456_789,
            session_frame: 4096,
            session_id: 7,
        }
    }

    #[test]
    fn test_meta_wire_roundtrip() {
        let meta = sample_meta();
        let bytes = meta.to_bytes();
        assert_eq!(bytes.len(), CAPTURE_FRAME_WIRE_LEN);
        assert_eq!(CaptureFrame::from_bytes(&bytes), meta);
        assert_eq!(meta.payload_len(), 128 * 2 * 2);
    }

    #[test]
    fn test_encode_and_push_pair() {
        let meta_ring = SampleRing::new(1024);
        let pcm_ring = SampleRing::new(1024);
        let mut enc = CaptureEncoder::new(8, Default::default());

        let input = [0.25f32, -0.75, 1.0, 0.0];
        let mut meta = sample_meta();
        meta.num_frames = 2;
        assert!(enc.encode_and_push(&input, &meta, &meta_ring, &pcm_ring));

        assert_eq!(meta_ring.len(), CAPTURE_FRAME_WIRE_LEN);
        assert_eq!(pcm_ring.len(), 8);
        assert_eq!(enc.stats().last_peak(), 1.0);

        let mut payload = [0u8; 8];
        assert_eq!(pcm_ring.pop(&mut payload), 8);
        let first = i16::from_le_bytes([payload[0], payload[1]]);
        assert_eq!(first, f32_to_pcm16(0.25));
    }

    #[test]
    fn test_pair_dropped_when_payload_ring_full() {
        let meta_ring = SampleRing::new(1024);
        // Too small for the payload: pair must be dropped atomically.
        let pcm_ring = SampleRing::new(4);
        let mut enc = CaptureEncoder::new(8, Default::default());

        let input = [0.1f32; 4];
        let mut meta = sample_meta();
        meta.num_frames = 2;
        assert!(!enc.encode_and_push(&input, &meta, &meta_ring, &pcm_ring));

        assert!(meta_ring.is_empty());
        assert!(pcm_ring.is_empty());
        assert_eq!(enc.stats().dropped_callbacks(), 1);
    }

    #[test]
    fn test_pair_dropped_when_meta_ring_full() {
        let meta_ring = SampleRing::new(8);
        let pcm_ring = SampleRing::new(1024);
        let mut enc = CaptureEncoder::new(8, Default::default());

        let mut meta = sample_meta();
        meta.num_frames = 1;
        assert!(!enc.encode_and_push(&[0.1, 0.1], &meta, &meta_ring, &pcm_ring));
        assert!(meta_ring.is_empty());
        assert!(pcm_ring.is_empty());
    }

    #[test]
    fn test_peak_tracks_loudest_sample() {
        let meta_ring = SampleRing::new(1024);
        let pcm_ring = SampleRing::new(1024);
        let mut enc = CaptureEncoder::new(8, Default::default());

        let mut meta = sample_meta();
        meta.num_frames = 2;
        enc.encode_and_push(&[0.1, -0.6, 0.3, 0.2], &meta, &meta_ring, &pcm_ring);
        assert_eq!(enc.stats().last_peak(), 0.6);
    }
}
