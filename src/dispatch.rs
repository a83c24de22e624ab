//! Background delivery of captured audio
//!
//! The dispatch worker drains matched (metadata, payload) pairs from the
//! capture rings on a dedicated thread and performs the potentially slow
//! delivery — to the take writer or the registered consumer — that must
//! never run on the audio callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::audio::ring::SampleRing;
use crate::codec::pcm::{CaptureFrame, CAPTURE_FRAME_WIRE_LEN};
use crate::codec::wav::TakeWriter;
use crate::constants::WORKER_WAKE_TIMEOUT_MS;

/// Receiver of captured audio, invoked from the worker thread.
///
/// `pcm` is an owned little-endian PCM16 payload copied out of the ring;
/// it never aliases ring storage. The callback may block.
pub trait CaptureConsumer: Send + Sync {
    fn on_captured(&self, pcm: Bytes, meta: &CaptureFrame);
}

impl<F> CaptureConsumer for F
where
    F: Fn(Bytes, &CaptureFrame) + Send + Sync,
{
    fn on_captured(&self, pcm: Bytes, meta: &CaptureFrame) {
        self(pcm, meta)
    }
}

/// Slot holding the live consumer, swappable at any time.
pub type ConsumerSlot = Arc<Mutex<Option<Arc<dyn CaptureConsumer>>>>;

/// Slot holding the open take writer, if any.
pub type TakeSlot = Arc<Mutex<Option<TakeWriter>>>;

/// The capture rings plus the worker's wake primitive.
///
/// The audio callback pushes into the rings and calls [`notify`]; the
/// worker waits with a bounded timeout, so a missed notification (the
/// callback never takes the wake lock) delays a drain by at most one
/// timeout period.
///
/// [`notify`]: DispatchChannels::notify
pub struct DispatchChannels {
    pub meta_ring: SampleRing,
    pub pcm_ring: SampleRing,
    wake_lock: Mutex<()>,
    wake_cv: Condvar,
}

impl DispatchChannels {
    pub fn new(meta_capacity: usize, pcm_capacity: usize) -> Self {
        Self {
            meta_ring: SampleRing::new(meta_capacity),
            pcm_ring: SampleRing::new(pcm_capacity),
            wake_lock: Mutex::new(()),
            wake_cv: Condvar::new(),
        }
    }

    /// Wake the worker. Lock-free from the caller's side.
    pub fn notify(&self) {
        self.wake_cv.notify_one();
    }

    fn wait(&self, timeout: Duration) {
        let mut guard = self.wake_lock.lock();
        let _ = self.wake_cv.wait_for(&mut guard, timeout);
    }

    /// Clear both rings. Only safe while no producer is running.
    pub fn clear(&self) {
        self.meta_ring.clear();
        self.pcm_ring.clear();
    }
}

/// Handle to the running dispatch thread.
pub struct DispatchWorker {
    handle: Option<JoinHandle<()>>,
}

impl DispatchWorker {
    /// Spawn the worker thread. It runs until `running` is cleared, then
    /// exits after its current drain pass.
    pub fn spawn(
        channels: Arc<DispatchChannels>,
        running: Arc<AtomicBool>,
        consumer: ConsumerSlot,
        take: TakeSlot,
    ) -> std::io::Result<Self> {
        let handle = thread::Builder::new()
            .name("capture-dispatch".into())
            .spawn(move || {
                tracing::debug!("dispatch worker started");
                while running.load(Ordering::Acquire) {
                    channels.wait(Duration::from_millis(WORKER_WAKE_TIMEOUT_MS));
                    drain(&channels, &consumer, &take);
                }
                tracing::debug!("dispatch worker exiting");
            })?;
        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Block until the thread has exited. The caller must already have
    /// cleared the running flag and notified the channels.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Drain complete (metadata, payload) pairs in lock-step.
///
/// A metadata record is not complete until its full payload is also in the
/// payload ring; the producer may have written metadata fractionally ahead,
/// in which case draining stops until the next wake.
fn drain(channels: &DispatchChannels, consumer: &ConsumerSlot, take: &TakeSlot) {
    loop {
        let mut meta_buf = [0u8; CAPTURE_FRAME_WIRE_LEN];
        if !channels.meta_ring.peek(&mut meta_buf) {
            break;
        }
        let meta = CaptureFrame::from_bytes(&meta_buf);
        let payload_len = meta.payload_len();
        if channels.pcm_ring.len() < payload_len {
            break;
        }

        channels.meta_ring.pop(&mut meta_buf);
        let mut payload = vec![0u8; payload_len];
        channels.pcm_ring.pop(&mut payload);
        let payload = Bytes::from(payload);

        deliver(payload, &meta, consumer, take);
    }
}

/// Hand one captured frame to its outlet.
///
/// While a take writer is open it is the exclusive destination and the
/// live consumer is suppressed. With neither attached the frame is
/// discarded; capture data is allowed to be lost when nobody listens.
fn deliver(payload: Bytes, meta: &CaptureFrame, consumer: &ConsumerSlot, take: &TakeSlot) {
    let mut take_guard = take.lock();
    if let Some(writer) = take_guard.as_mut() {
        if let Err(e) = writer.append_payload(&payload, meta.channels) {
            tracing::warn!("take write failed, frame lost: {e}");
        }
        return;
    }
    drop(take_guard);

    let handler = consumer.lock().clone();
    if let Some(handler) = handler {
        handler.on_captured(payload, meta);
    }
}
