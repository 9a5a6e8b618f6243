//! Pool of reusable coroutine frames.
//!
//! A task's first execution pass acquires a frame; the frame stays with the
//! task across suspension and resumption, and returns to the pool when the
//! body finishes. Frames retain their scratch allocation, so subsequent
//! tasks reuse the memory without re-allocating.

use orcha_core::CoroFrame;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Per-worker pool of coroutine frames.
pub struct StackPool {
    frames: Mutex<Vec<CoroFrame>>,
    outstanding: AtomicUsize,
}

impl StackPool {
    /// Create a pool pre-filled with `prefill` frames.
    pub fn new(prefill: usize) -> Self {
        let mut frames = Vec::with_capacity(prefill);
        frames.resize_with(prefill, CoroFrame::new);
        Self {
            frames: Mutex::new(frames),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Hand out a frame, allocating a fresh one if the pool is empty.
    pub fn acquire(&self) -> CoroFrame {
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        self.frames.lock().pop().unwrap_or_else(CoroFrame::new)
    }

    /// Return a frame to the pool. The pool never drops frames; it grows to
    /// hold whatever was handed out.
    pub fn release(&self, mut frame: CoroFrame) {
        frame.reset();
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        self.frames.lock().push(frame);
    }

    /// Frames currently handed out.
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    /// Frames currently sitting in the pool.
    pub fn pooled_count(&self) -> usize {
        self.frames.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_accounting() {
        let pool = StackPool::new(2);
        assert_eq!(pool.pooled_count(), 2);
        assert_eq!(pool.outstanding_count(), 0);

        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(pool.outstanding_count(), 2);
        assert_eq!(pool.pooled_count(), 0);

        // Pool empty: falls back to a fresh allocation.
        let c = pool.acquire();
        assert_eq!(pool.outstanding_count(), 3);

        pool.release(a);
        pool.release(b);
        pool.release(c);
        assert_eq!(pool.outstanding_count(), 0);
        // The pool grew to hold the extra frame.
        assert_eq!(pool.pooled_count(), 3);
    }

    #[test]
    fn test_released_frames_are_reset() {
        let pool = StackPool::new(1);
        let mut frame = pool.acquire();
        frame.scratch_mut().push(7);
        frame.set_resume_point(4);
        pool.release(frame);

        let recycled = pool.acquire();
        assert_eq!(recycled.resume_point(), 0);
        assert!(recycled.scratch().is_empty());
    }
}
