//! Lock-free single-producer/single-consumer ring buffer (component C1).
//!
//! Ported from the teacher's `rf_audio::ringbuf::AudioRingBuffer`: a
//! power-of-two-capacity buffer with atomic read/write cursors and
//! acquire/release ordering, so one thread can call `write` while a
//! different thread concurrently calls `read` with no lock between them.

use std::sync::atomic::{AtomicUsize, Ordering};

use strata_core::Sample;

/// A lock-free ring buffer of interleaved samples.
///
/// `#[repr(align(64))]` keeps the two cursors on separate cache lines so the
/// producer and consumer don't false-share (same rationale as the teacher's
/// `AudioRingBuffer`).
#[repr(align(64))]
pub struct RingBuffer {
    buffer: Box<[Sample]>,
    mask: usize,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
}

impl RingBuffer {
    /// `capacity` is rounded up to the next power of two.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        Self {
            buffer: vec![0.0; capacity].into_boxed_slice(),
            mask: capacity - 1,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Samples currently readable without blocking.
    #[inline]
    pub fn available_read(&self) -> usize {
        let w = self.write_pos.load(Ordering::Acquire);
        let r = self.read_pos.load(Ordering::Acquire);
        w.wrapping_sub(r)
    }

    /// Free slots currently writable without overwriting unread data.
    #[inline]
    pub fn available_write(&self) -> usize {
        self.capacity() - self.available_read()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.available_read() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.available_write() == 0
    }

    /// Writes as many of `src` as fit without overwriting unread data.
    /// Returns the number of samples actually written. Producer-only: must
    /// not be called from more than one thread concurrently.
    pub fn write(&self, src: &[Sample]) -> usize {
        let can_write = self.available_write();
        let n = src.len().min(can_write);
        if n == 0 {
            return 0;
        }

        let w = self.write_pos.load(Ordering::Relaxed);
        let cap = self.capacity();
        for (i, &s) in src[..n].iter().enumerate() {
            let idx = (w.wrapping_add(i)) & self.mask;
            // SAFETY: single producer, index is within bounds (mask keeps it
            // inside the buffer), and the consumer only reads slots below
            // `write_pos` (Release below publishes this write to it).
            unsafe {
                let ptr = self.buffer.as_ptr().add(idx) as *mut Sample;
                ptr.write(s);
            }
        }
        let _ = cap;
        self.write_pos.store(w.wrapping_add(n), Ordering::Release);
        n
    }

    /// Reads as many samples into `dst` as are available. Returns the
    /// number actually read (may be less than `dst.len()` on underrun).
    /// Consumer-only: must not be called from more than one thread
    /// concurrently.
    pub fn read(&self, dst: &mut [Sample]) -> usize {
        let can_read = self.available_read();
        let n = dst.len().min(can_read);
        if n == 0 {
            return 0;
        }

        let r = self.read_pos.load(Ordering::Relaxed);
        for (i, slot) in dst[..n].iter_mut().enumerate() {
            let idx = (r.wrapping_add(i)) & self.mask;
            *slot = unsafe { *self.buffer.as_ptr().add(idx) };
        }
        self.read_pos.store(r.wrapping_add(n), Ordering::Release);
        n
    }

    /// Reads without consuming.
    pub fn peek(&self, dst: &mut [Sample]) -> usize {
        let can_read = self.available_read();
        let n = dst.len().min(can_read);
        let r = self.read_pos.load(Ordering::Relaxed);
        for (i, slot) in dst[..n].iter_mut().enumerate() {
            let idx = (r.wrapping_add(i)) & self.mask;
            *slot = unsafe { *self.buffer.as_ptr().add(idx) };
        }
        n
    }

    /// Drops all unread data. Only safe when the producer is quiescent
    /// (e.g. during a track seek, before streaming resumes).
    pub fn clear(&self) {
        let w = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(w, Ordering::Release);
    }
}

// SAFETY: access to `buffer` is partitioned by the write/read cursors; the
// producer only ever touches indices `[write_pos_old, write_pos_new)` and
// the consumer only `[read_pos_old, read_pos_new)`, which never overlap
// because `write` never advances past `available_write()`.
unsafe impl Sync for RingBuffer {}
unsafe impl Send for RingBuffer {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_capacity_to_power_of_two() {
        let rb = RingBuffer::new(100);
        assert_eq!(rb.capacity(), 128);
    }

    #[test]
    fn write_then_read_round_trips() {
        let rb = RingBuffer::new(16);
        let src = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(rb.write(&src), 4);
        let mut dst = [0.0; 4];
        assert_eq!(rb.read(&mut dst), 4);
        assert_eq!(dst, src);
    }

    #[test]
    fn write_never_exceeds_available_space() {
        let rb = RingBuffer::new(4);
        let src = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(rb.write(&src), 4);
        assert_eq!(rb.available_write(), 0);
    }

    #[test]
    fn partial_read_on_underrun() {
        let rb = RingBuffer::new(8);
        rb.write(&[1.0, 2.0]);
        let mut dst = [0.0; 4];
        assert_eq!(rb.read(&mut dst), 2);
        assert_eq!(&dst[..2], &[1.0, 2.0]);
    }

    #[test]
    fn clear_drops_unread_data() {
        let rb = RingBuffer::new(8);
        rb.write(&[1.0, 2.0, 3.0]);
        rb.clear();
        assert!(rb.is_empty());
        assert_eq!(rb.available_write(), rb.capacity());
    }

    #[test]
    fn wraps_around_buffer_boundary() {
        let rb = RingBuffer::new(4);
        rb.write(&[1.0, 2.0, 3.0]);
        let mut dst = [0.0; 2];
        rb.read(&mut dst);
        rb.write(&[4.0, 5.0]);
        let mut rest = [0.0; 3];
        let n = rb.read(&mut rest);
        assert_eq!(n, 3);
        assert_eq!(rest, [3.0, 4.0, 5.0]);
    }
}
