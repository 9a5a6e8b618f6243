//! Task identity and state.
//!
//! A task is a unit of work bound to a pool and a method, carrying a routing
//! descriptor and an atomic state-flag set. Tasks are shared between the
//! submitting client and the worker engine through `TaskRef` handles; all
//! cross-thread state lives in atomics or behind short-lived locks.

use crate::context::RunContext;
use crate::domain::DomainQuery;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared handle to a task.
pub type TaskRef = Arc<Task>;

/// Unique identifier for a task graph root.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique id.
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The numeric id value.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Rebuild an id from its numeric value.
    pub fn from_u64(id: u64) -> Self {
        TaskId(id)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hierarchical task identity: the root task plus the spawn depth below it.
///
/// A task spawned by another task is `parent.child()`: same root, depth + 1.
/// Depth zero identifies freshly-submitted client work.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TaskNode {
    /// Root of the task graph this task belongs to
    pub root: TaskId,
    /// Spawn depth below the root
    pub depth: u32,
}

impl TaskNode {
    /// A fresh root node.
    pub fn new_root() -> Self {
        Self {
            root: TaskId::new(),
            depth: 0,
        }
    }

    /// The node of a task spawned by this one.
    pub fn child(&self) -> Self {
        Self {
            root: self.root,
            depth: self.depth + 1,
        }
    }

    /// Is this a freshly-submitted (root-depth) task?
    pub fn is_root(&self) -> bool {
        self.depth == 0
    }
}

impl fmt::Display for TaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.root, self.depth)
    }
}

/// Identifier of a pool (a logical service instance owning containers).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(pub u64);

impl PoolId {
    /// The null pool: no task addressed here can ever succeed.
    pub const NULL: PoolId = PoolId(0);

    /// The built-in admin pool handling container construction and runtime
    /// control.
    pub const ADMIN: PoolId = PoolId(1);

    /// First id available to user pools.
    pub const FIRST_USER: PoolId = PoolId(16);

    /// Is this the null pool?
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operation selector within a container.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MethodId(pub u32);

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Methods understood by the built-in admin pool.
pub mod admin_method {
    use super::MethodId;

    /// Construct a container under a pool.
    pub const CREATE_CONTAINER: MethodId = MethodId(0);
    /// Tear a pool's containers down.
    pub const DESTROY_CONTAINER: MethodId = MethodId(1);
    /// Drive the runtime to quiescence.
    pub const FLUSH: MethodId = MethodId(2);
    /// Stop the worker pool.
    pub const STOP_RUNTIME: MethodId = MethodId(3);
}

/// Latency class used by the classifier and the client lane groups.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum TaskPrio {
    /// Latency-sensitive traffic
    #[default]
    LowLatency,
    /// Throughput traffic that tolerates queueing
    HighLatency,
}

// State-flag bits. MODULE_COMPLETE is monotonic: set once, never cleared.
const STARTED: u32 = 1 << 0;
const BLOCKED: u32 = 1 << 1;
const MODULE_COMPLETE: u32 = 1 << 2;
const COMPLETE: u32 = 1 << 3;
const REMOTE: u32 = 1 << 4;
const LONG_RUNNING: u32 = 1 << 5;
const FLUSH: u32 = 1 << 6;
const FIRE_AND_FORGET: u32 = 1 << 7;
const SIGNAL_UNBLOCK: u32 = 1 << 8;
const SIGNAL_REMOTE_COMPLETE: u32 = 1 << 9;

/// Properties of a task computed at the top of each execution attempt.
#[derive(Debug, Copy, Clone, Default)]
pub struct TaskProps {
    /// The task's readiness predicate says it is due now
    pub should_run: bool,
    /// The task is tagged for remote execution
    pub is_remote: bool,
    /// The worker is in a flush round
    pub is_flushing: bool,
    /// The task is a long-running background service
    pub long_running: bool,
}

/// A unit of work bound to a pool and a method.
pub struct Task {
    /// Hierarchical identity
    task_node: TaskNode,
    /// Owning pool
    pool: PoolId,
    /// Operation selector
    method: MethodId,
    /// Latency class
    prio: TaskPrio,
    /// Routing descriptor fixed at creation
    dom_query: DomainQuery,
    /// Atomic state-flag set
    flags: AtomicU32,
    /// Re-run interval for periodic long-running tasks
    period: Option<Duration>,
    /// When the task last ran (written only by the owning worker)
    last_run: Mutex<Option<Instant>>,
    /// Transient per-execution state (owning worker only while active)
    rctx: Mutex<RunContext>,
    /// Method input, interpreted by the owning container
    payload: Mutex<Option<Box<dyn Any + Send>>>,
    /// Method output, collected by the waiter
    output: Mutex<Option<Box<dyn Any + Send>>>,
    /// Completion signaling for external waiters
    done: Mutex<bool>,
    done_cv: Condvar,
}

impl Task {
    /// Create a task addressed to `pool`/`method` with the given routing
    /// descriptor.
    pub fn new(
        task_node: TaskNode,
        pool: PoolId,
        method: MethodId,
        prio: TaskPrio,
        dom_query: DomainQuery,
    ) -> Self {
        Self {
            task_node,
            pool,
            method,
            prio,
            dom_query,
            flags: AtomicU32::new(0),
            period: None,
            last_run: Mutex::new(None),
            rctx: Mutex::new(RunContext::default()),
            payload: Mutex::new(None),
            output: Mutex::new(None),
            done: Mutex::new(false),
            done_cv: Condvar::new(),
        }
    }

    /// Tag the task as flush-class work.
    pub fn with_flush(self) -> Self {
        self.flags.fetch_or(FLUSH, Ordering::Relaxed);
        self
    }

    /// Tag the task as a long-running service, re-run every `period`.
    pub fn with_long_running(self, period: Option<Duration>) -> Self {
        self.flags.fetch_or(LONG_RUNNING, Ordering::Relaxed);
        Self { period, ..self }
    }

    /// Tag the task as fire-and-forget: completion only deallocates.
    pub fn with_fire_and_forget(self) -> Self {
        self.flags.fetch_or(FIRE_AND_FORGET, Ordering::Relaxed);
        self
    }

    /// Attach the method input.
    pub fn with_payload<T: Any + Send>(self, payload: T) -> Self {
        *self.payload.lock() = Some(Box::new(payload));
        self
    }

    /// Hierarchical identity.
    pub fn task_node(&self) -> TaskNode {
        self.task_node
    }

    /// Owning pool.
    pub fn pool(&self) -> PoolId {
        self.pool
    }

    /// Operation selector.
    pub fn method(&self) -> MethodId {
        self.method
    }

    /// Latency class.
    pub fn prio(&self) -> TaskPrio {
        self.prio
    }

    /// Routing descriptor.
    pub fn dom_query(&self) -> DomainQuery {
        self.dom_query
    }

    // =========================================================================
    // State flags
    // =========================================================================

    fn any(&self, mask: u32) -> bool {
        self.flags.load(Ordering::Acquire) & mask != 0
    }

    fn set(&self, mask: u32) {
        self.flags.fetch_or(mask, Ordering::AcqRel);
    }

    fn clear(&self, mask: u32) {
        self.flags.fetch_and(!mask, Ordering::AcqRel);
    }

    /// Has the task begun its body (coroutine frame live)?
    pub fn is_started(&self) -> bool {
        self.any(STARTED)
    }

    /// Mark the body as begun; its frame stays live until cleared.
    pub fn set_started(&self) {
        self.set(STARTED);
    }

    /// Mark the body as finished; the frame may be reclaimed.
    pub fn clear_started(&self) {
        self.clear(STARTED);
    }

    /// Is the task parked waiting on a child or remote reply?
    pub fn is_blocked(&self) -> bool {
        self.any(BLOCKED)
    }

    /// Park the task; it leaves the runnable queues until unblocked.
    pub fn set_blocked(&self) {
        self.set(BLOCKED);
    }

    /// Return the task to a runnable state.
    pub fn clear_blocked(&self) {
        self.clear(BLOCKED);
    }

    /// Has the module declared the task's work done? Monotonic.
    pub fn is_module_complete(&self) -> bool {
        self.any(MODULE_COMPLETE)
    }

    /// Declare the task's work done. Never cleared once set.
    pub fn set_module_complete(&self) {
        self.set(MODULE_COMPLETE);
    }

    /// Has the scheduler finished the task's lifecycle?
    pub fn is_complete(&self) -> bool {
        self.any(COMPLETE)
    }

    /// Finish the lifecycle and wake external waiters.
    pub fn set_complete(&self) {
        self.set(COMPLETE);
        let mut done = self.done.lock();
        *done = true;
        self.done_cv.notify_all();
    }

    /// Is the task tagged for remote execution?
    pub fn is_remote(&self) -> bool {
        self.any(REMOTE)
    }

    /// Tag the task for remote execution.
    pub fn set_remote(&self) {
        self.set(REMOTE);
    }

    /// Is this a long-running background service task?
    pub fn is_long_running(&self) -> bool {
        self.any(LONG_RUNNING)
    }

    /// Is this flush-class work?
    pub fn is_flush(&self) -> bool {
        self.any(FLUSH)
    }

    /// Does completion only deallocate, with no waiter to notify?
    pub fn is_fire_and_forget(&self) -> bool {
        self.any(FIRE_AND_FORGET)
    }

    /// Must completion wake a parked waiter?
    pub fn should_signal_unblock(&self) -> bool {
        self.any(SIGNAL_UNBLOCK)
    }

    /// Must completion notify the remote origin node?
    pub fn should_signal_remote_complete(&self) -> bool {
        self.any(SIGNAL_REMOTE_COMPLETE)
    }

    /// Mark this task as a received replica whose result must be pushed back
    /// to its origin node.
    pub fn set_signal_remote_complete(&self) {
        self.set(SIGNAL_REMOTE_COMPLETE);
    }

    // =========================================================================
    // Waiting
    // =========================================================================

    /// Register `waiter` to be signaled when this task completes, and park it.
    ///
    /// Called by a container body before returning `TaskStep::Blocked` from
    /// the waiter's execution.
    pub fn set_waiter(&self, waiter: &TaskRef) {
        self.rctx.lock().pending_to = Some(waiter.clone());
        self.set(SIGNAL_UNBLOCK);
        waiter.set_blocked();
    }

    /// Block the calling OS thread until the task completes.
    ///
    /// For client threads only; worker threads never call this.
    pub fn wait_complete(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.done_cv.wait(&mut done);
        }
    }

    /// As `wait_complete` with a timeout; returns completion status.
    pub fn wait_complete_timeout(&self, timeout: Duration) -> bool {
        let mut done = self.done.lock();
        if !*done {
            self.done_cv.wait_for(&mut done, timeout);
        }
        *done
    }

    // =========================================================================
    // Readiness
    // =========================================================================

    /// Is the task due to run now?
    ///
    /// Non-periodic tasks are always due. Periodic long-running tasks are due
    /// once their interval has elapsed, and always due under flushing so a
    /// flush pass can observe them.
    pub fn should_run(&self, now: Instant, flushing: bool) -> bool {
        if !self.is_long_running() || flushing {
            return true;
        }
        match (self.period, *self.last_run.lock()) {
            (Some(period), Some(last)) => now.duration_since(last) >= period,
            _ => true,
        }
    }

    /// Record an execution attempt for the readiness predicate.
    pub fn did_run(&self, now: Instant) {
        *self.last_run.lock() = Some(now);
    }

    // =========================================================================
    // Run context and payloads
    // =========================================================================

    /// The transient per-execution state.
    ///
    /// Locked by the owning worker around each execution attempt; other
    /// threads only touch it through the sanctioned unblock hand-off.
    pub fn rctx(&self) -> &Mutex<RunContext> {
        &self.rctx
    }

    /// Take the method input, if it has the expected type.
    pub fn take_payload<T: Any + Send>(&self) -> Option<Box<T>> {
        let boxed = self.payload.lock().take()?;
        match boxed.downcast::<T>() {
            Ok(p) => Some(p),
            Err(other) => {
                *self.payload.lock() = Some(other);
                None
            }
        }
    }

    /// Store the method output for the waiter to collect.
    pub fn set_output<T: Any + Send>(&self, output: T) {
        *self.output.lock() = Some(Box::new(output));
    }

    /// Collect the method output, if it has the expected type.
    pub fn take_output<T: Any + Send>(&self) -> Option<Box<T>> {
        let boxed = self.output.lock().take()?;
        match boxed.downcast::<T>() {
            Ok(p) => Some(p),
            Err(other) => {
                *self.output.lock() = Some(other);
                None
            }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("task_node", &self.task_node)
            .field("pool", &self.pool)
            .field("method", &self.method)
            .field("flags", &self.flags.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ContainerId;

    fn test_task() -> Task {
        Task::new(
            TaskNode::new_root(),
            PoolId::FIRST_USER,
            MethodId(0),
            TaskPrio::LowLatency,
            DomainQuery::local_id(ContainerId(0)),
        )
    }

    #[test]
    fn test_task_node_child() {
        let root = TaskNode::new_root();
        let child = root.child();
        assert_eq!(child.root, root.root);
        assert_eq!(child.depth, 1);
        assert!(root.is_root());
        assert!(!child.is_root());
    }

    #[test]
    fn test_flag_defaults() {
        let task = test_task();
        assert!(!task.is_started());
        assert!(!task.is_blocked());
        assert!(!task.is_module_complete());
        assert!(!task.is_complete());
        assert!(!task.is_remote());
        assert!(!task.is_flush());
        assert!(!task.is_fire_and_forget());
    }

    #[test]
    fn test_module_complete_is_monotonic() {
        let task = test_task();
        task.set_module_complete();
        assert!(task.is_module_complete());
        // No clear operation exists; completing the lifecycle keeps it set.
        task.set_complete();
        assert!(task.is_module_complete());
    }

    #[test]
    fn test_started_blocked_round_trip() {
        let task = test_task();
        task.set_started();
        task.set_blocked();
        assert!(task.is_started());
        assert!(task.is_blocked());
        task.clear_blocked();
        task.clear_started();
        assert!(!task.is_started());
        assert!(!task.is_blocked());
    }

    #[test]
    fn test_builder_tags() {
        let task = test_task()
            .with_flush()
            .with_fire_and_forget()
            .with_long_running(Some(Duration::from_millis(5)));
        assert!(task.is_flush());
        assert!(task.is_fire_and_forget());
        assert!(task.is_long_running());
    }

    #[test]
    fn test_should_run_periodic() {
        let task = test_task().with_long_running(Some(Duration::from_secs(3600)));
        let now = Instant::now();
        // Never ran: due.
        assert!(task.should_run(now, false));
        task.did_run(now);
        // Interval not elapsed: not due.
        assert!(!task.should_run(now, false));
        // Flushing forces readiness.
        assert!(task.should_run(now, true));
    }

    #[test]
    fn test_should_run_non_periodic() {
        let task = test_task();
        task.did_run(Instant::now());
        assert!(task.should_run(Instant::now(), false));
    }

    #[test]
    fn test_payload_round_trip() {
        let task = test_task().with_payload(41u64);
        // Wrong type leaves the payload in place.
        assert!(task.take_payload::<String>().is_none());
        let p = task.take_payload::<u64>().unwrap();
        assert_eq!(*p, 41);
        assert!(task.take_payload::<u64>().is_none());
    }

    #[test]
    fn test_output_round_trip() {
        let task = test_task();
        task.set_output("ok".to_string());
        assert_eq!(*task.take_output::<String>().unwrap(), "ok");
    }

    #[test]
    fn test_set_waiter_parks_and_flags() {
        let child = Arc::new(test_task());
        let parent = Arc::new(test_task());
        child.set_waiter(&parent);
        assert!(child.should_signal_unblock());
        assert!(parent.is_blocked());
        let pending = child.rctx().lock().pending_to.take().unwrap();
        assert_eq!(pending.task_node(), parent.task_node());
    }

    #[test]
    fn test_wait_complete_timeout() {
        let task = test_task();
        assert!(!task.wait_complete_timeout(Duration::from_millis(10)));
        task.set_complete();
        assert!(task.wait_complete_timeout(Duration::from_millis(10)));
    }
}
