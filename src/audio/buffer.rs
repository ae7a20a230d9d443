//! Lock-free ring buffer for audio frames
//!
//! Single-producer single-consumer hand-off between a pump thread and a
//! real-time audio callback. Frames are raw little-endian sample bytes.

use bytes::{Buf, Bytes};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Lock-free ring buffer for audio frames
pub struct RingBuffer {
    queue: ArrayQueue<Bytes>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl RingBuffer {
    /// Create a new ring buffer with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push a frame into the buffer
    /// Returns false if buffer is full (overflow)
    pub fn push(&self, frame: Bytes) -> bool {
        match self.queue.push(frame) {
            Ok(()) => true,
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Pop a frame from the buffer
    /// Returns None if buffer is empty (underrun)
    pub fn pop(&self) -> Option<Bytes> {
        match self.queue.pop() {
            Some(frame) => Some(frame),
            None => {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer = Arc<RingBuffer>;

/// Create a new shared ring buffer
pub fn create_shared_buffer(capacity: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity))
}

/// Drains a ring buffer sample by sample, carrying partial frames over
/// between audio callbacks.
pub struct SampleReader {
    buffer: SharedRingBuffer,
    current: Bytes,
}

impl SampleReader {
    pub fn new(buffer: SharedRingBuffer) -> Self {
        Self {
            buffer,
            current: Bytes::new(),
        }
    }

    /// Fill `out` with the next `out.len()` bytes. Returns false on underrun,
    /// in which case the caller should emit silence.
    pub fn next_sample(&mut self, out: &mut [u8]) -> bool {
        while self.current.remaining() < out.len() {
            // Drop a torn trailing sample rather than splicing two frames.
            match self.buffer.pop() {
                Some(frame) => self.current = frame,
                None => return false,
            }
        }
        self.current.copy_to_slice(out);
        true
    }
}
