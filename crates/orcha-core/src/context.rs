//! Per-execution run context, coroutine frames, and flush counters.

use crate::container::Container;
use crate::task::TaskRef;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;

/// Default scratch capacity for a fresh coroutine frame, in slots.
pub const DEFAULT_FRAME_CAPACITY: usize = 256;

/// Resumable execution state for one task body.
///
/// The state-machine rendition of a coroutine stack: a container stores its
/// intermediate values in `scratch` and records a resume point before
/// suspending; the next pass switches on the resume point instead of
/// re-entering from the top. Frames are pooled per worker so the scratch
/// allocation is reused across task lifetimes.
#[derive(Debug, Default)]
pub struct CoroFrame {
    resume_point: u32,
    scratch: Vec<u64>,
}

impl CoroFrame {
    /// A fresh frame with the default scratch capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FRAME_CAPACITY)
    }

    /// A fresh frame with `capacity` scratch slots reserved.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            resume_point: 0,
            scratch: Vec::with_capacity(capacity),
        }
    }

    /// Where the body should resume.
    pub fn resume_point(&self) -> u32 {
        self.resume_point
    }

    /// Record where the body should resume on its next pass.
    pub fn set_resume_point(&mut self, point: u32) {
        self.resume_point = point;
    }

    /// Saved intermediate values.
    pub fn scratch(&self) -> &[u64] {
        &self.scratch
    }

    /// Saved intermediate values, writable.
    pub fn scratch_mut(&mut self) -> &mut Vec<u64> {
        &mut self.scratch
    }

    /// Clear the frame for reuse, retaining the scratch allocation.
    pub fn reset(&mut self) {
        self.resume_point = 0;
        self.scratch.clear();
    }
}

/// Per-worker flush barrier state, readable by every worker.
#[derive(Debug, Default)]
pub struct FlushCounters {
    /// The worker is inside a flush round
    pub flushing: AtomicBool,
    /// Consecutive flush iterations without convergence
    pub iter: AtomicU64,
    /// Flush-eligible work observed by this worker
    pub count: AtomicU64,
    /// Snapshot of `count` at the last progress check
    pub work_done: AtomicU64,
}

impl FlushCounters {
    /// Fresh counters, not flushing.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Transient state attached to a task while it is active on a worker.
///
/// Populated immediately before each execution attempt, persists across
/// suspension and resumption of the same task, discarded when the task
/// completes.
#[derive(Default)]
pub struct RunContext {
    /// Worker currently responsible for the task
    pub worker_id: u32,
    /// The owning worker's flush counters
    pub flush: Option<Arc<FlushCounters>>,
    /// The container the task resolved to for this attempt
    pub container: Option<Arc<dyn Container>>,
    /// The task's coroutine frame while its body is started
    pub frame: Option<CoroFrame>,
    /// Task to signal when this one completes
    pub pending_to: Option<TaskRef>,
    /// Replica tasks to merge during multi-target aggregation
    pub replicas: Vec<TaskRef>,
}

impl RunContext {
    /// Drop per-execution state when a task completes.
    pub fn discard(&mut self) {
        self.frame = None;
        self.pending_to = None;
        self.replicas.clear();
        self.flush = None;
        self.container = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_reset_retains_capacity() {
        let mut frame = CoroFrame::with_capacity(8);
        frame.scratch_mut().extend([1, 2, 3]);
        frame.set_resume_point(2);
        frame.reset();
        assert_eq!(frame.resume_point(), 0);
        assert!(frame.scratch().is_empty());
        assert!(frame.scratch_mut().capacity() >= 8);
    }

    #[test]
    fn test_run_context_discard() {
        let mut rctx = RunContext {
            worker_id: 3,
            flush: Some(Arc::new(FlushCounters::new())),
            container: None,
            frame: Some(CoroFrame::new()),
            pending_to: None,
            replicas: Vec::new(),
        };
        rctx.discard();
        assert!(rctx.frame.is_none());
        assert!(rctx.flush.is_none());
    }
}
