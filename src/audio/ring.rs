//! Lock-free byte ring for crossing the real-time boundary
//!
//! This implements a single-producer single-consumer (SPSC) byte ring
//! used to move capture data from the audio callback to the dispatch
//! worker without blocking either side.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fixed-capacity single-producer/single-consumer byte ring.
///
/// One slot is always kept free, so a ring of capacity `C` holds at most
/// `C - 1` bytes. `push` is all-or-nothing and never blocks or allocates;
/// `pop` returns the largest available prefix; `peek` inspects without
/// consuming.
///
/// # Safety contract
///
/// At most one thread may call `push` at a time and at most one (other)
/// thread may call `pop`/`peek` at a time. `clear` is only safe while no
/// concurrent push or pop is in flight. Violating this is a caller
/// contract violation; the type is `Sync` only under that protocol.
pub struct SampleRing {
    buf: UnsafeCell<Box<[u8]>>,
    cap: usize,
    /// Write index, owned by the producer.
    head: AtomicUsize,
    /// Read index, owned by the consumer.
    tail: AtomicUsize,
}

unsafe impl Send for SampleRing {}
unsafe impl Sync for SampleRing {}

impl SampleRing {
    /// Create a ring with the given capacity in bytes.
    ///
    /// Usable space is `capacity - 1` bytes.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 2, "ring capacity must be at least 2 bytes");
        Self {
            buf: UnsafeCell::new(vec![0u8; capacity].into_boxed_slice()),
            cap: capacity,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Total capacity in bytes (one byte of which stays reserved).
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Bytes currently held.
    pub fn len(&self) -> usize {
        let h = self.head.load(Ordering::Acquire);
        let t = self.tail.load(Ordering::Acquire);
        if h >= t {
            h - t
        } else {
            self.cap - (t - h)
        }
    }

    /// True if no bytes are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes that can be pushed right now.
    pub fn free(&self) -> usize {
        self.cap - self.len() - 1
    }

    /// Append `data`, or refuse entirely if there is not enough free space.
    ///
    /// Returns `true` on success. Never blocks, never allocates, never
    /// writes a partial record.
    pub fn push(&self, data: &[u8]) -> bool {
        if data.is_empty() {
            return true;
        }
        let h = self.head.load(Ordering::Relaxed);
        let t = self.tail.load(Ordering::Acquire);
        let used = if h >= t { h - t } else { self.cap - (t - h) };
        let free = self.cap - used - 1;
        if data.len() > free {
            return false;
        }

        let buf = unsafe { &mut *self.buf.get() };
        let chunk = data.len().min(self.cap - h);
        buf[h..h + chunk].copy_from_slice(&data[..chunk]);
        if data.len() > chunk {
            buf[..data.len() - chunk].copy_from_slice(&data[chunk..]);
        }

        self.head
            .store((h + data.len()) % self.cap, Ordering::Release);
        true
    }

    /// Copy up to `out.len()` bytes into `out` without consuming them.
    ///
    /// Returns `false` if fewer than `out.len()` bytes are available.
    pub fn peek(&self, out: &mut [u8]) -> bool {
        if self.len() < out.len() {
            return false;
        }
        let t = self.tail.load(Ordering::Relaxed);
        let buf = unsafe { &*self.buf.get() };
        let chunk = out.len().min(self.cap - t);
        out[..chunk].copy_from_slice(&buf[t..t + chunk]);
        if out.len() > chunk {
            let rest = out.len() - chunk;
            out[chunk..].copy_from_slice(&buf[..rest]);
        }
        true
    }

    /// Pop up to `out.len()` bytes. Returns the number actually popped,
    /// which is zero when the ring is empty.
    pub fn pop(&self, out: &mut [u8]) -> usize {
        let t = self.tail.load(Ordering::Relaxed);
        let avail = self.len();
        let n = out.len().min(avail);
        if n == 0 {
            return 0;
        }

        let buf = unsafe { &*self.buf.get() };
        let chunk = n.min(self.cap - t);
        out[..chunk].copy_from_slice(&buf[t..t + chunk]);
        if n > chunk {
            out[chunk..n].copy_from_slice(&buf[..n - chunk]);
        }

        self.tail.store((t + n) % self.cap, Ordering::Release);
        n
    }

    /// Reset both indices, discarding all held bytes.
    ///
    /// Only safe when no concurrent push or pop is in flight (the
    /// real-time producer must not be running).
    pub fn clear(&self) {
        self.head.store(0, Ordering::Release);
        self.tail.store(0, Ordering::Release);
    }
}
