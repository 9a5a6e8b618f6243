//! Worker: the per-core scheduling engine.
//!
//! Each worker owns one OS thread, ingests its assigned ingress lanes into
//! the private classifier through the routing decision, polls the
//! sub-queues in fixed precedence order, and drives task bodies as
//! cooperatively-suspended executions. At most one task runs per worker at
//! any instant; suspension happens only at task-chosen points.

use crate::classifier::{PrivateTaskMultiQueue, PrivateTaskQueueEntry, SubQueue, UnblockSignal};
use crate::error::RuntimeError;
use crate::ingress::{LaneKind, WorkEntry};
use crate::orchestrator::{EngineShared, WorkOrchestrator};
use crate::stack::StackPool;
use crossbeam::queue::SegQueue;
use orcha_core::{
    Container, DomainQuery, FlushCounters, Lane, LaneId, MonitorMode, PoolId, RunContext,
    TaskProps, TaskRef, TaskStep,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Bound on the {construction, low-latency} alternation inside one
/// iteration. Construction and low-latency work can spawn more of the same
/// class; the bound keeps a chain of them from starving the high-latency
/// and long-running queues indefinitely.
pub const MAX_FAST_ROUNDS: usize = 8192;

/// Iterations between refreshes of the worker's cached timestamp.
const TIME_REFRESH_INTERVAL: usize = 10_000;

// Worker flag bits.
const CONTINUOUS_POLLING: u32 = 1 << 0;

/// Outcome of the routing decision for one ingested task.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskRouteMode {
    /// The task is already on the correct worker; execute without requeue.
    ThisWorker,
    /// The task belongs to another local worker's lane; hand it over
    /// through the shared admission surface.
    LocalWorker(Lane),
    /// The task must be redispatched through the remote-queue mechanism.
    RemoteWorker,
}

/// A per-core worker engine.
pub struct Worker {
    id: u32,
    flags: AtomicU32,
    sleep_us: AtomicU64,
    affinity: AtomicI32,
    flush: Arc<FlushCounters>,
    active: Mutex<PrivateTaskMultiQueue>,
    signals: UnblockSignal,
    stacks: StackPool,
    poll_requests: SegQueue<Vec<WorkEntry>>,
    relinquish_requests: SegQueue<Vec<WorkEntry>>,
    work_proc: Mutex<Vec<WorkEntry>>,
    work_inter: Mutex<Vec<WorkEntry>>,
    /// Task graphs active on this worker, keyed by root id
    graphs: Mutex<FxHashMap<u64, i64>>,
    shared: Arc<EngineShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Create a worker bound to the shared engine state.
    pub(crate) fn new(id: u32, shared: Arc<EngineShared>) -> Self {
        let active = PrivateTaskMultiQueue::new(shared.config.queue_depth);
        let signals = active.signal_handle();
        let mut flags = 0;
        if shared.config.continuous_polling {
            flags |= CONTINUOUS_POLLING;
        }
        let affinity = if shared.config.pin_workers {
            id as i32
        } else {
            -1
        };
        Self {
            id,
            flags: AtomicU32::new(flags),
            sleep_us: AtomicU64::new(shared.config.sleep_us),
            affinity: AtomicI32::new(affinity),
            flush: Arc::new(FlushCounters::new()),
            active: Mutex::new(active),
            signals,
            stacks: StackPool::new(shared.config.stack_pool_size),
            poll_requests: SegQueue::new(),
            relinquish_requests: SegQueue::new(),
            work_proc: Mutex::new(Vec::new()),
            work_inter: Mutex::new(Vec::new()),
            graphs: Mutex::new(FxHashMap::default()),
            shared,
            handle: Mutex::new(None),
        }
    }

    /// This worker's id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The worker's flush barrier counters.
    pub fn flush_counters(&self) -> &Arc<FlushCounters> {
        &self.flush
    }

    /// The worker's coroutine frame pool.
    pub fn stack_pool(&self) -> &StackPool {
        &self.stacks
    }

    // =========================================================================
    // Cross-thread entry points
    // =========================================================================

    /// Tell the worker to start polling `queues`. Callable from any thread;
    /// the request is queued and applied inside the worker's loop.
    pub fn poll_queues(&self, queues: Vec<WorkEntry>) {
        self.poll_requests.push(queues);
    }

    /// Tell the worker to stop polling `queues`. Callable from any thread;
    /// applied inside the worker's loop.
    pub fn relinquishing_queues(&self, queues: Vec<WorkEntry>) {
        self.relinquish_requests.push(queues);
    }

    /// Is the worker still holding un-applied relinquish requests?
    pub fn is_relinquishing_queues(&self) -> bool {
        !self.relinquish_requests.is_empty()
    }

    /// Hand a task owned by this worker back into a runnable state.
    /// Callable from any thread; consumed only by this worker during its
    /// completion-processing step.
    pub fn signal_unblock(&self, task: TaskRef) {
        self.signals.signal(task);
    }

    /// Sleep `sleep_us` microseconds between idle iterations instead of
    /// polling continuously.
    pub fn set_polling_frequency(&self, sleep_us: u64) {
        self.sleep_us.store(sleep_us, Ordering::Relaxed);
        self.flags.fetch_and(!CONTINUOUS_POLLING, Ordering::Relaxed);
    }

    /// Never sleep or yield between iterations.
    pub fn enable_continuous_polling(&self) {
        self.flags.fetch_or(CONTINUOUS_POLLING, Ordering::Relaxed);
    }

    /// Re-enable sleeping between idle iterations.
    pub fn disable_continuous_polling(&self) {
        self.flags.fetch_and(!CONTINUOUS_POLLING, Ordering::Relaxed);
    }

    /// Is the worker configured to poll continuously?
    pub fn is_continuous_polling(&self) -> bool {
        self.flags.load(Ordering::Relaxed) & CONTINUOUS_POLLING != 0
    }

    /// Pin the worker to `cpu` (applied when its thread starts).
    pub fn set_cpu_affinity(&self, cpu: i32) {
        self.affinity.store(cpu, Ordering::Relaxed);
    }

    pub(crate) fn set_handle(&self, handle: JoinHandle<()>) {
        *self.handle.lock() = Some(handle);
    }

    pub(crate) fn take_handle(&self) -> Option<JoinHandle<()>> {
        self.handle.lock().take()
    }

    // =========================================================================
    // Main loop
    // =========================================================================

    /// The worker thread body: iterate until the orchestrator reports
    /// shutdown, then take one final forced flush pass to drain committed
    /// work.
    pub(crate) fn run_loop(&self, orch: &Arc<WorkOrchestrator>) {
        let node = self.shared.node_id;
        self.apply_affinity();
        if self.is_continuous_polling() {
            Self::make_dedicated();
        }
        info!(node = %node, worker = self.id, "worker entering loop");
        let mut cur_time = Instant::now();
        let mut work: usize = 0;
        while orch.is_alive() {
            // Fault boundary: one task's failure must not take the worker
            // down with it.
            let iteration = catch_unwind(AssertUnwindSafe(|| {
                let flushing = self.flush.flushing.load(Ordering::Acquire)
                    || self.active.lock().len(SubQueue::Flush) > 0;
                if flushing {
                    self.begin_flush(orch);
                }
                let done = self.run(flushing, cur_time, orch);
                if flushing {
                    self.end_flush(orch);
                }
                done
            }));
            match iteration {
                Ok(done) => work += done,
                Err(payload) => {
                    error!(
                        node = %node,
                        worker = self.id,
                        "worker caught a panic from task execution: {}",
                        panic_message(&payload)
                    );
                }
            }
            work += 1;
            if work >= TIME_REFRESH_INTERVAL {
                work = 0;
                cur_time = Instant::now();
            }
            self.yield_now();
        }
        info!(node = %node, worker = self.id, "worker wrapping up");
        self.run(true, Instant::now(), orch);
        info!(node = %node, worker = self.id, "worker has exited");
    }

    /// One iteration over all queues. Returns the amount of work done.
    pub(crate) fn run(
        &self,
        flushing: bool,
        now: Instant,
        orch: &Arc<WorkOrchestrator>,
    ) -> usize {
        // Apply lane assignment changes queued from outside.
        if !self.poll_requests.is_empty() {
            self.apply_poll_requests();
        }
        if !self.relinquish_requests.is_empty() {
            self.apply_relinquish_requests();
        }
        let mut work = 0;
        self.ingest_proc_lanes();
        work += self.poll_private_queue(SubQueue::NewWork, flushing, now, orch);
        for _ in 0..MAX_FAST_ROUNDS {
            let mut diff = 0;
            self.ingest_inter_lanes();
            diff += self.poll_private_queue(SubQueue::Construct, flushing, now, orch);
            diff += self.poll_private_queue(SubQueue::LowLat, flushing, now, orch);
            if diff == 0 {
                break;
            }
            work += diff;
        }
        work += self.poll_private_queue(SubQueue::HighLat, flushing, now, orch);
        self.poll_private_queue(SubQueue::LongRunning, flushing, now, orch);
        work
    }

    fn apply_poll_requests(&self) {
        while let Some(batch) = self.poll_requests.pop() {
            for entry in batch {
                match entry.kind {
                    LaneKind::Process => self.work_proc.lock().push(entry),
                    LaneKind::Internal => self.work_inter.lock().push(entry),
                }
            }
        }
    }

    fn apply_relinquish_requests(&self) {
        while let Some(batch) = self.relinquish_requests.pop() {
            for entry in batch {
                let id = entry.lane.id();
                self.work_proc.lock().retain(|we| we.lane.id() != id);
                self.work_inter.lock().retain(|we| we.lane.id() != id);
            }
        }
    }

    // =========================================================================
    // Ingestion and routing
    // =========================================================================

    fn ingest_proc_lanes(&self) {
        let entries = self.work_proc.lock().clone();
        for entry in &entries {
            self.ingest_lane(entry);
        }
    }

    fn ingest_inter_lanes(&self) {
        let entries = self.work_inter.lock().clone();
        for entry in &entries {
            self.ingest_lane(entry);
        }
    }

    /// Drain one ingress lane into the classifier through the routing
    /// decision. Stops on an empty peek or on backpressure.
    fn ingest_lane(&self, work_entry: &WorkEntry) {
        let lane = &work_entry.lane;
        loop {
            let Some(task) = lane.peek() else {
                break;
            };
            let mut dom_query = task.dom_query();
            match self.reroute(task.pool(), &mut dom_query, &task, lane.id()) {
                Err(err) => {
                    // Fatal for this task only: abandon it.
                    error!(
                        node = %self.shared.node_id,
                        worker = self.id,
                        task = %task.task_node(),
                        "dropping task with unroutable query: {err}"
                    );
                    lane.pop();
                }
                Ok(TaskRouteMode::LocalWorker(target)) => {
                    let Some(target_lane) = self.shared.ingress.lane_by_id(target.ingress_id)
                    else {
                        error!(
                            node = %self.shared.node_id,
                            worker = self.id,
                            task = %task.task_node(),
                            lane = %target.ingress_id,
                            "container routed task to an unknown lane"
                        );
                        lane.pop();
                        continue;
                    };
                    if target_lane.emplace(task.clone()).is_ok() {
                        lane.pop();
                    } else {
                        // Target worker is backed up; retry next iteration.
                        break;
                    }
                }
                Ok(mode) => {
                    if mode == TaskRouteMode::RemoteWorker {
                        task.set_remote();
                    }
                    let entry = PrivateTaskQueueEntry {
                        task: task.clone(),
                        res_query: dom_query,
                    };
                    if self.active.lock().push(entry) {
                        lane.pop();
                    } else {
                        break;
                    }
                }
            }
        }
    }

    /// Decide whether a task stays here, moves to another local worker, or
    /// must go remote. `dom_query` is concretized in place.
    pub(crate) fn reroute(
        &self,
        pool: PoolId,
        dom_query: &mut DomainQuery,
        task: &TaskRef,
        arrival: LaneId,
    ) -> Result<TaskRouteMode, RuntimeError> {
        let resolved = self.shared.resolver.resolve(pool, dom_query, false);
        if resolved.len() == 1 && resolved[0].node == self.shared.node_id {
            *dom_query = resolved[0].query;
            if dom_query.is_local_id() {
                let Some(selector) = dom_query.selector_id() else {
                    return Ok(TaskRouteMode::RemoteWorker);
                };
                match self.shared.registry.get_container(pool, selector) {
                    Some(exec) => {
                        let lane = exec.route(task);
                        if lane.ingress_id == arrival {
                            Ok(TaskRouteMode::ThisWorker)
                        } else {
                            Ok(TaskRouteMode::LocalWorker(lane))
                        }
                    }
                    // Not constructed yet: keep the task here and let the
                    // execution path retry once construction completes.
                    None => Ok(TaskRouteMode::ThisWorker),
                }
            } else {
                // Non-direct resolution: re-resolve through the general path.
                Ok(TaskRouteMode::RemoteWorker)
            }
        } else if !resolved.is_empty() {
            Ok(TaskRouteMode::RemoteWorker)
        } else {
            Err(RuntimeError::UnresolvableQuery {
                pool,
                query: *dom_query,
            })
        }
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Drain a sub-queue's current size, then apply pending unblock signals.
    pub(crate) fn poll_private_queue(
        &self,
        queue: SubQueue,
        flushing: bool,
        now: Instant,
        orch: &Arc<WorkOrchestrator>,
    ) -> usize {
        let size = self.active.lock().len(queue);
        let mut work = 0;
        for _ in 0..size {
            let Some(entry) = self.active.lock().pop(queue) else {
                break;
            };
            let pushback = self.run_task(&entry, flushing, now, orch);
            if pushback {
                self.active.lock().requeue(queue, entry);
            }
            work += 1;
        }
        self.process_completions();
        work
    }

    /// Apply pending cross-worker unblock signals.
    pub(crate) fn process_completions(&self) {
        let mut active = self.active.lock();
        while active.unblock() {}
    }

    /// Run one task. Returns whether the entry should remain pending.
    pub(crate) fn run_task(
        &self,
        entry: &PrivateTaskQueueEntry,
        flushing: bool,
        now: Instant,
        orch: &Arc<WorkOrchestrator>,
    ) -> bool {
        let task = &entry.task;
        let props = self.task_props(task, now, flushing);
        let exec = if props.is_remote {
            self.shared.registry.get_static_container(task.pool())
        } else {
            entry
                .res_query
                .selector_id()
                .and_then(|sel| self.shared.registry.get_container(task.pool(), sel))
        };
        let Some(exec) = exec else {
            if task.pool().is_null() {
                // This task can never succeed; force-complete and drop it.
                error!(
                    node = %self.shared.node_id,
                    worker = self.id,
                    task = %task.task_node(),
                    "task pool does not exist"
                );
                task.set_module_complete();
                return false;
            }
            // Construction race: leave the task pending for a later retry.
            return true;
        };
        {
            // Pack the runtime context for this attempt.
            let mut rctx = task.rctx().lock();
            rctx.worker_id = self.id;
            rctx.flush = Some(self.flush.clone());
            rctx.container = Some(exec.clone());
            if !task.is_module_complete() {
                self.exec_task(entry, &exec, &mut rctx, props, now);
            }
        }
        if task.is_module_complete() {
            self.end_task(task, orch);
            false
        } else {
            // Blocked entries were parked by exec_task.
            !task.is_blocked()
        }
    }

    /// The properties that gate this execution attempt.
    fn task_props(&self, task: &TaskRef, now: Instant, flushing: bool) -> TaskProps {
        TaskProps {
            should_run: task.should_run(now, flushing),
            is_remote: task.is_remote(),
            is_flushing: flushing,
            long_running: task.is_long_running(),
        }
    }

    /// Execute one attempt of a runnable task.
    fn exec_task(
        &self,
        entry: &PrivateTaskQueueEntry,
        exec: &Arc<dyn Container>,
        rctx: &mut RunContext,
        props: TaskProps,
        now: Instant,
    ) {
        let task = &entry.task;
        if !props.should_run {
            return;
        }
        if props.is_flushing {
            if props.long_running {
                exec.monitor(MonitorMode::FlushStat, task, rctx);
            } else if !task.is_flush() {
                self.flush.count.fetch_add(1, Ordering::Relaxed);
            }
        }
        if props.is_remote {
            // Park the local entry and hand a proxy to the remote-queue
            // subsystem; a completion signal wakes it later.
            task.set_blocked();
            self.active.lock().block(entry.clone());
            if let Err(err) = self.shared.remote.submit_async(task) {
                error!(
                    node = %self.shared.node_id,
                    worker = self.id,
                    task = %task.task_node(),
                    "remote submission failed: {err}"
                );
                task.set_module_complete();
                // Wake the parked entry so the completion path can run.
                self.signals.signal(task.clone());
            }
            return;
        }
        let first_pass = !task.is_started();
        if first_pass {
            exec.monitor(MonitorMode::BeginWork, task, rctx);
            self.graph_enter(task);
        }
        self.exec_coroutine(task, exec, rctx);
        if !task.is_started() {
            exec.monitor(MonitorMode::EndWork, task, rctx);
            self.graph_exit(task);
        }
        task.did_run(now);
        if task.is_blocked() {
            self.active.lock().block(entry.clone());
        }
    }

    /// Drive the task body for one pass on its coroutine frame.
    fn exec_coroutine(&self, task: &TaskRef, exec: &Arc<dyn Container>, rctx: &mut RunContext) {
        if !task.is_started() {
            rctx.frame = Some(self.stacks.acquire());
            task.set_started();
        }
        match exec.run(task.method(), task, rctx) {
            Ok(TaskStep::Done) => task.clear_started(),
            Ok(TaskStep::Yielded) => {}
            Ok(TaskStep::Blocked) => task.set_blocked(),
            Err(err) => {
                warn!(
                    node = %self.shared.node_id,
                    worker = self.id,
                    task = %task.task_node(),
                    "task body failed: {err}"
                );
                task.set_module_complete();
                task.clear_started();
            }
        }
        if !task.is_started() {
            if let Some(frame) = rctx.frame.take() {
                self.stacks.release(frame);
            }
        }
    }

    /// Finish a module-complete task's lifecycle. Exactly one of
    /// signal-unblock, signal-remote-complete, delete, or mark-complete
    /// happens, in that priority order.
    pub(crate) fn end_task(&self, task: &TaskRef, orch: &Arc<WorkOrchestrator>) {
        let pending = {
            let mut rctx = task.rctx().lock();
            if let Some(frame) = rctx.frame.take() {
                self.stacks.release(frame);
            }
            let pending = rctx.pending_to.take();
            rctx.discard();
            pending
        };
        if task.should_signal_unblock() {
            if let Some(waiter) = pending {
                orch.signal_unblock(waiter);
            } else {
                warn!(
                    node = %self.shared.node_id,
                    worker = self.id,
                    task = %task.task_node(),
                    "task should signal a waiter but none is registered"
                );
            }
            return;
        }
        if task.should_signal_remote_complete() {
            if let Err(err) = self.shared.remote.push_complete(task) {
                error!(
                    node = %self.shared.node_id,
                    worker = self.id,
                    task = %task.task_node(),
                    "remote completion push failed: {err}"
                );
            }
            return;
        }
        if task.is_fire_and_forget() {
            // Dropping the last reference returns the task to its allocator.
            return;
        }
        task.set_complete();
    }

    fn graph_enter(&self, task: &TaskRef) {
        *self
            .graphs
            .lock()
            .entry(task.task_node().root.as_u64())
            .or_insert(0) += 1;
    }

    fn graph_exit(&self, task: &TaskRef) {
        let mut graphs = self.graphs.lock();
        let root = task.task_node().root.as_u64();
        if let Some(count) = graphs.get_mut(&root) {
            *count -= 1;
            if *count <= 0 {
                graphs.remove(&root);
            }
        }
    }

    // =========================================================================
    // Flush barrier
    // =========================================================================

    /// First phase of a flush round: the first worker to observe pending
    /// flush work marks every worker flushing and bumps its iteration.
    pub(crate) fn begin_flush(&self, orch: &Arc<WorkOrchestrator>) {
        if self.flush.iter.load(Ordering::Acquire) == 0
            && self.active.lock().len(SubQueue::Flush) > 0
        {
            for worker in orch.workers() {
                worker.flush.flushing.store(true, Ordering::Release);
            }
        }
        self.flush.iter.fetch_add(1, Ordering::AcqRel);
    }

    /// Second phase: clear our own flag, then hold at the barrier until no
    /// worker reports flushing. No worker may observe the barrier clear
    /// while another is still mid-iteration.
    pub(crate) fn end_flush(&self, orch: &Arc<WorkOrchestrator>) {
        self.flush.flushing.store(false, Ordering::Release);
        while orch.any_flushing() {
            thread::yield_now();
        }
        if self.active.lock().len(SubQueue::Flush) > 0 {
            if orch.any_flush_work_done() {
                // Progress was made somewhere: another round is warranted.
                self.flush.iter.store(0, Ordering::Release);
            } else {
                // Quiescent: one direct pass lets flush tasks observe it.
                self.poll_private_queue(SubQueue::Flush, false, Instant::now(), orch);
            }
        }
    }

    // =========================================================================
    // OS-thread controls
    // =========================================================================

    fn yield_now(&self) {
        if self.is_continuous_polling() {
            return;
        }
        let us = self.sleep_us.load(Ordering::Relaxed);
        if us > 0 {
            thread::sleep(Duration::from_micros(us));
        } else {
            thread::yield_now();
        }
    }

    #[cfg(target_os = "linux")]
    fn apply_affinity(&self) {
        let cpu = self.affinity.load(Ordering::Relaxed);
        if cpu < 0 {
            return;
        }
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_ZERO(&mut set);
            libc::CPU_SET(cpu as usize, &mut set);
            libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn apply_affinity(&self) {}

    /// Give a continuously-polling worker realtime priority; failure is
    /// fine, the worker just shares its core.
    #[cfg(target_os = "linux")]
    fn make_dedicated() {
        unsafe {
            let param = libc::sched_param { sched_priority: 1 };
            libc::sched_setscheduler(0, libc::SCHED_FIFO, &param);
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn make_dedicated() {}
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
