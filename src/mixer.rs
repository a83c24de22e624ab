//! Per-callback sample-accurate mixing
//!
//! Sums the reference track and (in review mode) the offset vocal track
//! into the hardware output buffer. The mixed output is the raw float sum;
//! it is deliberately not limited or clamped before reaching the hardware,
//! so gains that push the sum outside [-1, 1] may clip downstream.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use crate::tracks::MixView;

/// Lock-free mix parameters shared between the control surface and the
/// audio callback. Gains are stored as `f32` bit patterns so the callback
/// never takes a lock; each field is individually consistent.
pub struct MixParams {
    reference_gain: AtomicU32,
    vocal_gain: AtomicU32,
    vocal_offset: AtomicI64,
}

impl MixParams {
    pub fn new() -> Self {
        Self {
            reference_gain: AtomicU32::new(1.0f32.to_bits()),
            vocal_gain: AtomicU32::new(0.0f32.to_bits()),
            vocal_offset: AtomicI64::new(0),
        }
    }

    pub fn set_gains(&self, reference: f32, vocal: f32) {
        self.reference_gain
            .store(reference.to_bits(), Ordering::Relaxed);
        self.vocal_gain.store(vocal.to_bits(), Ordering::Relaxed);
    }

    pub fn reference_gain(&self) -> f32 {
        f32::from_bits(self.reference_gain.load(Ordering::Relaxed))
    }

    pub fn vocal_gain(&self) -> f32 {
        f32::from_bits(self.vocal_gain.load(Ordering::Relaxed))
    }

    /// Vocal alignment offset in frames. Positive values delay the vocal
    /// against the reference; negative values advance it.
    pub fn set_vocal_offset(&self, frames: i64) {
        self.vocal_offset.store(frames, Ordering::Relaxed);
    }

    pub fn vocal_offset(&self) -> i64 {
        self.vocal_offset.load(Ordering::Relaxed)
    }
}

impl Default for MixParams {
    fn default() -> Self {
        Self::new()
    }
}

/// Fill `out` (interleaved, `channels` wide) with `out.len() / channels`
/// frames starting at absolute frame position `start_frame`.
///
/// The reference track contributes `reference[frame * ref_ch + (c % ref_ch)]`
/// scaled by the reference gain, and silence past its end; tracks shorter
/// than the session do not wrap around. The vocal track contributes only
/// when `review` is true: the mono sample at `frame - vocal_offset`, added
/// to every output channel, silence for out-of-range indices.
pub fn render(
    out: &mut [f32],
    channels: usize,
    start_frame: u64,
    review: bool,
    view: &MixView,
    params: &MixParams,
) {
    let reference_gain = params.reference_gain();
    let vocal_gain = params.vocal_gain();
    let vocal_offset = params.vocal_offset();

    let ref_frames = view.reference_frames();
    let ref_channels = view.reference_channels;
    let vocal_frames = view.vocal_frames();
    let num_frames = out.len() / channels;

    for i in 0..num_frames {
        let frame = start_frame as usize + i;

        let vocal_sample = if review && vocal_frames > 0 {
            let vi = frame as i64 - vocal_offset;
            if vi >= 0 && (vi as usize) < vocal_frames {
                view.vocal[vi as usize] * vocal_gain
            } else {
                0.0
            }
        } else {
            0.0
        };

        for c in 0..channels {
            let reference_sample = if frame < ref_frames {
                view.reference[frame * ref_channels + (c % ref_channels)] * reference_gain
            } else {
                0.0
            };
            out[i * channels + c] = reference_sample + vocal_sample;
        }
    }
}
