//! Owned reference and vocal track buffers
//!
//! The store holds the decoded reference track (interleaved, native channel
//! layout) and the vocal track (mono). Buffers are immutable once loaded;
//! loading swaps in a new `Arc`. The render path takes the lock only long
//! enough to clone the arcs out into a [`MixView`], so mixing itself runs
//! without the lock held.

use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Default)]
struct Tracks {
    reference: Arc<[f32]>,
    reference_channels: usize,
    reference_sample_rate: u32,
    vocal: Arc<[f32]>,
    vocal_sample_rate: u32,
}

/// Lock-guarded owner of the session's track buffers.
///
/// Loading a track while frames are being rendered is only
/// correctness-defined if no callback races the swap; callers are expected
/// to load before starting a session.
pub struct TrackStore {
    inner: Mutex<Tracks>,
}

/// A render-path view of the current buffers: cheap arc clones copied out
/// under the lock, then read lock-free for the duration of one callback.
#[derive(Clone)]
pub struct MixView {
    pub reference: Arc<[f32]>,
    pub reference_channels: usize,
    pub vocal: Arc<[f32]>,
}

impl MixView {
    /// Reference track length in frames.
    pub fn reference_frames(&self) -> usize {
        if self.reference_channels == 0 {
            0
        } else {
            self.reference.len() / self.reference_channels
        }
    }

    /// Vocal track length in frames (mono).
    pub fn vocal_frames(&self) -> usize {
        self.vocal.len()
    }
}

impl TrackStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Tracks::default()),
        }
    }

    /// Install a new reference track (interleaved samples).
    pub fn set_reference(&self, samples: Vec<f32>, channels: usize, sample_rate: u32) {
        let mut tracks = self.inner.lock();
        tracks.reference = samples.into();
        tracks.reference_channels = channels;
        tracks.reference_sample_rate = sample_rate;
    }

    /// Install a new vocal track (mono samples).
    pub fn set_vocal(&self, samples: Vec<f32>, sample_rate: u32) {
        let mut tracks = self.inner.lock();
        tracks.vocal = samples.into();
        tracks.vocal_sample_rate = sample_rate;
    }

    /// Drop both tracks.
    pub fn clear(&self) {
        let mut tracks = self.inner.lock();
        *tracks = Tracks::default();
    }

    /// Copy out a view for one callback's mix. This is the only lock the
    /// render path ever takes, held just long enough for three arc clones.
    pub fn view(&self) -> MixView {
        let tracks = self.inner.lock();
        MixView {
            reference: tracks.reference.clone(),
            reference_channels: tracks.reference_channels,
            vocal: tracks.vocal.clone(),
        }
    }

    /// Sample rates of the loaded tracks `(reference, vocal)`; zero when a
    /// track is not loaded. Used to warn about session-rate mismatches.
    pub fn sample_rates(&self) -> (u32, u32) {
        let tracks = self.inner.lock();
        (tracks.reference_sample_rate, tracks.vocal_sample_rate)
    }
}

impl Default for TrackStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_store_view() {
        let store = TrackStore::new();
        let view = store.view();
        assert_eq!(view.reference_frames(), 0);
        assert_eq!(view.vocal_frames(), 0);
    }

    #[test]
    fn test_load_and_view() {
        let store = TrackStore::new();
        store.set_reference(vec![0.0; 200], 2, 48_000);
        store.set_vocal(vec![0.5; 50], 48_000);

        let view = store.view();
        assert_eq!(view.reference_frames(), 100);
        assert_eq!(view.vocal_frames(), 50);
        assert_eq!(store.sample_rates(), (48_000, 48_000));
    }

    #[test]
    fn test_view_survives_reload() {
        let store = TrackStore::new();
        store.set_reference(vec![1.0; 100], 1, 44_100);

        let view = store.view();
        store.set_reference(vec![2.0; 10], 1, 44_100);

        // The old view still sees the buffer it copied out.
        assert_eq!(view.reference_frames(), 100);
        assert_eq!(view.reference[0], 1.0);
        assert_eq!(store.view().reference_frames(), 10);
    }

    #[test]
    fn test_clear() {
        let store = TrackStore::new();
        store.set_vocal(vec![0.1; 10], 48_000);
        store.clear();
        assert_eq!(store.view().vocal_frames(), 0);
    }
}
