//! Work orchestrator: owns the worker pool and the flush barrier state.

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::ingress::IngressSet;
use crate::registry::ContainerRegistry;
use crate::remote::RemoteQueueClient;
use crate::resolver::DomainQueryResolver;
use crate::worker::Worker;
use orcha_core::{NodeId, TaskRef};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

/// Engine state shared by every worker: the collaborators the scheduler
/// consumes through narrow interfaces, plus the configuration. Built once
/// at startup and passed by reference; no component reaches for globals.
pub struct EngineShared {
    /// Identity of this node in the deployment
    pub node_id: NodeId,
    /// Pool and container lookup
    pub registry: Arc<ContainerRegistry>,
    /// Domain topology resolution
    pub resolver: Arc<dyn DomainQueryResolver>,
    /// Remote dispatch transport
    pub remote: Arc<dyn RemoteQueueClient>,
    /// The admission surface
    pub ingress: Arc<IngressSet>,
    /// Engine configuration
    pub config: RuntimeConfig,
}

thread_local! {
    static CURRENT_WORKER: Cell<Option<u32>> = const { Cell::new(None) };
}

/// Owns the worker pool, coordinates the flush barrier, and exposes worker
/// lookup for cross-worker signaling.
pub struct WorkOrchestrator {
    shared: Arc<EngineShared>,
    workers: Vec<Arc<Worker>>,
    alive: AtomicBool,
    started: AtomicBool,
}

impl WorkOrchestrator {
    /// Create the worker pool and queue each worker's round-robin lane
    /// assignment. Workers do not run until [`start`](Self::start).
    pub fn new(shared: Arc<EngineShared>) -> Arc<Self> {
        let count = shared.config.worker_count();
        let workers: Vec<Arc<Worker>> = (0..count as u32)
            .map(|id| Arc::new(Worker::new(id, shared.clone())))
            .collect();
        // Lane i of each group belongs to worker i; the assignment requests
        // apply inside each worker's loop.
        for worker in &workers {
            worker.poll_queues(shared.ingress.work_entries_for(worker.id()));
        }
        Arc::new(Self {
            shared,
            workers,
            alive: AtomicBool::new(true),
            started: AtomicBool::new(false),
        })
    }

    /// Spawn one OS thread per worker. Idempotent.
    pub fn start(self: &Arc<Self>) -> Result<(), RuntimeError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for worker in &self.workers {
            let worker = worker.clone();
            let orch = self.clone();
            let handle = thread::Builder::new()
                .name(format!("orcha-worker-{}", worker.id()))
                .spawn({
                    let worker = worker.clone();
                    move || {
                        CURRENT_WORKER.with(|c| c.set(Some(worker.id())));
                        worker.run_loop(&orch);
                    }
                })?;
            worker.set_handle(handle);
        }
        info!(
            node = %self.shared.node_id,
            workers = self.workers.len(),
            "work orchestrator started"
        );
        Ok(())
    }

    /// Is the system alive? Workers loop while this holds.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Request shutdown. Each worker exits after one final forced flush
    /// pass; call [`join`](Self::join) to wait for them.
    pub fn finalize(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Wait for every worker thread to exit.
    pub fn join(&self) {
        for worker in &self.workers {
            if let Some(handle) = worker.take_handle() {
                if handle.join().is_err() {
                    warn!(worker = worker.id(), "worker thread panicked at exit");
                }
            }
        }
    }

    /// The worker with the given id.
    pub fn get_worker(&self, id: u32) -> Option<&Arc<Worker>> {
        self.workers.get(id as usize)
    }

    /// The whole pool.
    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    /// Number of workers in the pool.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// The worker id of the calling thread, when it is a worker thread.
    pub fn current_worker_id() -> Option<u32> {
        CURRENT_WORKER.with(|c| c.get())
    }

    /// Wake a blocked task by handing it back to the worker that owns it.
    /// Callable from any thread; this is the one sanctioned point of
    /// cross-thread task hand-off.
    pub fn signal_unblock(&self, task: TaskRef) {
        let worker_id = task.rctx().lock().worker_id;
        match self.get_worker(worker_id) {
            Some(worker) => worker.signal_unblock(task),
            None => warn!(
                node = %self.shared.node_id,
                worker = worker_id,
                task = %task.task_node(),
                "unblock signal for a task with no owning worker"
            ),
        }
    }

    /// Does any worker still report itself inside a flush round?
    pub fn any_flushing(&self) -> bool {
        self.workers
            .iter()
            .any(|w| w.flush_counters().flushing.load(Ordering::Acquire))
    }

    /// Did any worker make flush progress since its last snapshot? Advances
    /// the snapshots as it checks.
    pub fn any_flush_work_done(&self) -> bool {
        let mut progressed = false;
        for worker in &self.workers {
            let flush = worker.flush_counters();
            let count = flush.count.load(Ordering::Acquire);
            if count != flush.work_done.load(Ordering::Acquire) {
                flush.work_done.store(count, Ordering::Release);
                progressed = true;
            }
        }
        progressed
    }
}

impl Drop for WorkOrchestrator {
    fn drop(&mut self) {
        self.finalize();
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::NullRemoteClient;
    use crate::resolver::StaticResolver;

    fn orchestrator(workers: usize) -> Arc<WorkOrchestrator> {
        let config = RuntimeConfig {
            workers,
            ..RuntimeConfig::default()
        };
        let registry = Arc::new(ContainerRegistry::new());
        let ingress = Arc::new(IngressSet::new(workers, 64, 64));
        let shared = Arc::new(EngineShared {
            node_id: NodeId(0),
            resolver: Arc::new(StaticResolver::new(NodeId(0), registry.clone())),
            registry,
            remote: Arc::new(NullRemoteClient),
            ingress,
            config,
        });
        WorkOrchestrator::new(shared)
    }

    #[test]
    fn test_pool_construction() {
        let orch = orchestrator(3);
        assert_eq!(orch.worker_count(), 3);
        assert!(orch.is_alive());
        assert!(orch.get_worker(2).is_some());
        assert!(orch.get_worker(3).is_none());
    }

    #[test]
    fn test_start_and_finalize() {
        let orch = orchestrator(2);
        orch.start().unwrap();
        // Idempotent.
        orch.start().unwrap();
        orch.finalize();
        orch.join();
        assert!(!orch.is_alive());
    }

    #[test]
    fn test_flush_progress_detection() {
        let orch = orchestrator(2);
        assert!(!orch.any_flush_work_done());
        orch.workers()[1]
            .flush_counters()
            .count
            .fetch_add(3, Ordering::AcqRel);
        // First check sees the delta and syncs the snapshot.
        assert!(orch.any_flush_work_done());
        assert!(!orch.any_flush_work_done());
    }

    #[test]
    fn test_any_flushing() {
        let orch = orchestrator(2);
        assert!(!orch.any_flushing());
        orch.workers()[0]
            .flush_counters()
            .flushing
            .store(true, Ordering::Release);
        assert!(orch.any_flushing());
    }

    #[test]
    fn test_current_worker_id_outside_worker_thread() {
        assert_eq!(WorkOrchestrator::current_worker_id(), None);
    }
}
