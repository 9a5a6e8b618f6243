//! Client submission path.
//!
//! Submission resolves the task's routing descriptor up front: a task that
//! pins to a single local direct-id target goes straight onto the ingress
//! lane its container maps it to, so the common case runs on the correct
//! worker without another hop. Everything else lands on a process lane by
//! hash and the worker-side routing decision moves it where it belongs.

use crate::error::RuntimeError;
use crate::orchestrator::EngineShared;
use orcha_core::{AllocReply, BufferAllocator, ShmHandle, TaskRef};
use std::sync::Arc;
use std::thread;
use tracing::debug;

/// Attempts between sleeps in the buffer-allocation retry loop.
const ALLOC_YIELDS_PER_SLEEP: usize = 64;

/// Handle through which tasks are enqueued into the engine.
#[derive(Clone)]
pub struct Client {
    shared: Arc<EngineShared>,
}

impl Client {
    pub(crate) fn new(shared: Arc<EngineShared>) -> Self {
        Self { shared }
    }

    /// Enqueue a task into the admission surface.
    pub fn schedule_task(&self, task: TaskRef) -> Result<(), RuntimeError> {
        let query = task.dom_query();
        let resolved = self
            .shared
            .resolver
            .resolve(task.pool(), &query, false);
        let Some(first) = resolved.first() else {
            return Err(RuntimeError::UnresolvableQuery {
                pool: task.pool(),
                query,
            });
        };
        if resolved.len() == 1 && first.node == self.shared.node_id && first.query.is_local_id()
        {
            if let Some(selector) = first.query.selector_id() {
                if let Some(exec) = self.shared.registry.get_container(task.pool(), selector) {
                    // Determine the lane the task maps to within the
                    // container and feed its bound worker directly.
                    let lane = exec.route(&task);
                    if let Some(ingress) = self.shared.ingress.lane_by_id(lane.ingress_id) {
                        debug!(
                            task = %task.task_node(),
                            lane = %lane.ingress_id,
                            worker = lane.worker_id,
                            "scheduling task on routed lane"
                        );
                        return ingress
                            .emplace(task)
                            .map_err(|_| RuntimeError::Backpressure {
                                lane: lane.ingress_id,
                            });
                    }
                }
            }
        }
        // Not pinned to a constructed local container yet: place on a
        // process lane; ingestion re-resolves through the general path.
        let hash = query
            .selector_hash()
            .unwrap_or_else(|| task.task_node().root.as_u64());
        let ingress = self.shared.ingress.hash_lane(hash);
        ingress.emplace(task).map_err(|_| RuntimeError::Backpressure {
            lane: ingress.id(),
        })
    }

    /// Allocate a buffer, retrying until the allocator can grant it.
    ///
    /// Transient exhaustion is not surfaced as an error: the loop yields
    /// the thread between attempts and sleeps briefly after a burst of
    /// refusals, returning only once the allocation succeeds.
    pub fn allocate_buffer(&self, allocator: &dyn BufferAllocator, len: usize) -> ShmHandle {
        let mut attempts = 0usize;
        loop {
            match allocator.allocate(len) {
                AllocReply::Granted(handle) => return handle,
                AllocReply::WouldBlock => {
                    attempts += 1;
                    if attempts % ALLOC_YIELDS_PER_SLEEP == 0 {
                        thread::sleep(std::time::Duration::from_micros(50));
                    } else {
                        thread::yield_now();
                    }
                }
            }
        }
    }
}
