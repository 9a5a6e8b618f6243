//! Private per-worker task classifier.
//!
//! Each worker keeps its pending tasks in six sub-queues with a fixed
//! first-match precedence: container construction must never starve behind
//! application traffic, flush work must be serviced even under backpressure
//! so quiescence can converge, and long-running services are isolated from
//! the fast path.
//!
//! The classifier is written and read only by its owning worker. The one
//! cross-thread operation is the unblock signal: any thread may push a
//! signal through an [`UnblockSignal`] handle, and only the owner consumes
//! signals in [`PrivateTaskMultiQueue::unblock`].

use crossbeam::queue::SegQueue;
use orcha_core::{admin_method, DomainQuery, PoolId, Task, TaskPrio, TaskRef};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::sync::Arc;

/// The six sub-queues, in polling precedence order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SubQueue {
    /// Container-construction requests from the admin pool
    Construct = 0,
    /// Flush-class work driving the quiescence barrier
    Flush = 1,
    /// Long-running background services
    LongRunning = 2,
    /// Freshly-submitted root-depth tasks
    NewWork = 3,
    /// Low-latency application traffic
    LowLat = 4,
    /// Everything else
    HighLat = 5,
}

const NUM_SUB_QUEUES: usize = 6;

/// The unit stored in classifier sub-queues: a task handle plus the routing
/// descriptor it resolved to at ingestion.
#[derive(Clone)]
pub struct PrivateTaskQueueEntry {
    /// The pending task
    pub task: TaskRef,
    /// Its resolved routing descriptor
    pub res_query: DomainQuery,
}

/// Cross-thread handle used to wake a task parked in this classifier.
///
/// Cloneable and callable from any thread; pushing is lock-free and never
/// touches the sub-queues the owner is mutating.
#[derive(Clone)]
pub struct UnblockSignal {
    signals: Arc<SegQueue<TaskRef>>,
}

impl UnblockSignal {
    /// Queue `task` for re-activation by the owning worker.
    pub fn signal(&self, task: TaskRef) {
        self.signals.push(task);
    }
}

// Blocked entries are keyed by task handle identity. Two tasks can share a
// TaskNode (siblings at the same depth), so the Arc address is the one key
// that is unique for as long as the entry holds the task alive.
fn task_key(task: &TaskRef) -> usize {
    Arc::as_ptr(task) as usize
}

/// Per-worker multi-queue of pending tasks.
pub struct PrivateTaskMultiQueue {
    queues: [VecDeque<PrivateTaskQueueEntry>; NUM_SUB_QUEUES],
    depth: usize,
    blocked: FxHashMap<usize, PrivateTaskQueueEntry>,
    /// Signals that arrived before their task was parked
    early_signals: FxHashSet<usize>,
    signals: Arc<SegQueue<TaskRef>>,
}

impl PrivateTaskMultiQueue {
    /// Create a classifier whose sub-queues admit at most `depth` entries.
    pub fn new(depth: usize) -> Self {
        Self {
            queues: Default::default(),
            depth,
            blocked: FxHashMap::default(),
            early_signals: FxHashSet::default(),
            signals: Arc::new(SegQueue::new()),
        }
    }

    /// A cross-thread signal handle bound to this classifier.
    pub fn signal_handle(&self) -> UnblockSignal {
        UnblockSignal {
            signals: self.signals.clone(),
        }
    }

    /// The sub-queue a task belongs to, by first-matching rule.
    pub fn classify(task: &Task) -> SubQueue {
        if task.pool() == PoolId::ADMIN && task.method() == admin_method::CREATE_CONTAINER {
            SubQueue::Construct
        } else if task.is_flush() {
            SubQueue::Flush
        } else if task.is_long_running() {
            SubQueue::LongRunning
        } else if task.task_node().is_root() {
            SubQueue::NewWork
        } else if task.prio() == TaskPrio::LowLatency {
            SubQueue::LowLat
        } else {
            SubQueue::HighLat
        }
    }

    /// Admit an entry into the sub-queue dictated by the precedence rules.
    /// Returns false when that sub-queue is at capacity.
    pub fn push(&mut self, entry: PrivateTaskQueueEntry) -> bool {
        let queue = &mut self.queues[Self::classify(&entry.task) as usize];
        if queue.len() >= self.depth {
            return false;
        }
        queue.push_back(entry);
        true
    }

    /// Re-insert an entry into a specific sub-queue. Requeues are not
    /// subject to the admission bound: dropping an already-admitted task
    /// would lose it.
    pub fn requeue(&mut self, queue: SubQueue, entry: PrivateTaskQueueEntry) {
        self.queues[queue as usize].push_back(entry);
    }

    /// Take the entry at the head of a sub-queue.
    pub fn pop(&mut self, queue: SubQueue) -> Option<PrivateTaskQueueEntry> {
        self.queues[queue as usize].pop_front()
    }

    /// Entries currently pending in a sub-queue.
    pub fn len(&self, queue: SubQueue) -> usize {
        self.queues[queue as usize].len()
    }

    /// Entries pending across all sub-queues (excludes blocked entries).
    pub fn total_len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    /// Is every sub-queue empty?
    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    /// Entries currently parked.
    pub fn blocked_len(&self) -> usize {
        self.blocked.len()
    }

    /// Remove a specific pending entry from a sub-queue.
    pub fn erase(&mut self, queue: SubQueue, task: &TaskRef) -> bool {
        let key = task_key(task);
        let queue = &mut self.queues[queue as usize];
        if let Some(pos) = queue.iter().position(|e| task_key(&e.task) == key) {
            queue.remove(pos);
            true
        } else {
            false
        }
    }

    /// Park an entry until an unblock signal arrives for its task.
    ///
    /// If the signal already arrived (a remote reply can beat the park), the
    /// entry goes straight back to a runnable sub-queue instead.
    pub fn block(&mut self, entry: PrivateTaskQueueEntry) {
        let key = task_key(&entry.task);
        if self.early_signals.remove(&key) {
            entry.task.clear_blocked();
            let queue = Self::classify(&entry.task);
            self.requeue(queue, entry);
        } else {
            self.blocked.insert(key, entry);
        }
    }

    /// Consume one pending unblock signal, returning whether one was
    /// processed. Owner-only; drained in a loop after each sub-queue pass.
    pub fn unblock(&mut self) -> bool {
        let Some(task) = self.signals.pop() else {
            return false;
        };
        let key = task_key(&task);
        if let Some(entry) = self.blocked.remove(&key) {
            entry.task.clear_blocked();
            let queue = Self::classify(&entry.task);
            self.requeue(queue, entry);
        } else {
            // Signal raced ahead of the park; remember it so the park
            // becomes a no-op.
            self.early_signals.insert(key);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orcha_core::{ContainerId, MethodId, TaskNode};
    use std::time::Duration;

    fn entry(task: Task) -> PrivateTaskQueueEntry {
        let query = task.dom_query();
        PrivateTaskQueueEntry {
            task: Arc::new(task),
            res_query: query,
        }
    }

    fn base_task(pool: PoolId, method: MethodId, prio: TaskPrio, depth: u32) -> Task {
        let mut node = TaskNode::new_root();
        node.depth = depth;
        Task::new(node, pool, method, prio, DomainQuery::local_id(ContainerId(0)))
    }

    fn user_task(prio: TaskPrio, depth: u32) -> Task {
        base_task(PoolId::FIRST_USER, MethodId(7), prio, depth)
    }

    #[test]
    fn test_precedence_construction_first() {
        // Admin construction beats every other attribute, including flush.
        let task = base_task(
            PoolId::ADMIN,
            admin_method::CREATE_CONTAINER,
            TaskPrio::HighLatency,
            0,
        )
        .with_flush()
        .with_long_running(None);
        assert_eq!(PrivateTaskMultiQueue::classify(&task), SubQueue::Construct);
    }

    #[test]
    fn test_precedence_flush_beats_long_running() {
        let task = user_task(TaskPrio::LowLatency, 1)
            .with_flush()
            .with_long_running(Some(Duration::from_millis(1)));
        assert_eq!(PrivateTaskMultiQueue::classify(&task), SubQueue::Flush);
    }

    #[test]
    fn test_precedence_long_running_beats_new_work() {
        let task = user_task(TaskPrio::LowLatency, 0).with_long_running(None);
        assert_eq!(PrivateTaskMultiQueue::classify(&task), SubQueue::LongRunning);
    }

    #[test]
    fn test_precedence_new_work_beats_latency_classes() {
        let low = user_task(TaskPrio::LowLatency, 0);
        let high = user_task(TaskPrio::HighLatency, 0);
        assert_eq!(PrivateTaskMultiQueue::classify(&low), SubQueue::NewWork);
        assert_eq!(PrivateTaskMultiQueue::classify(&high), SubQueue::NewWork);
    }

    #[test]
    fn test_precedence_latency_split() {
        let low = user_task(TaskPrio::LowLatency, 2);
        let high = user_task(TaskPrio::HighLatency, 2);
        assert_eq!(PrivateTaskMultiQueue::classify(&low), SubQueue::LowLat);
        assert_eq!(PrivateTaskMultiQueue::classify(&high), SubQueue::HighLat);
    }

    #[test]
    fn test_admin_non_construction_not_special() {
        // Admin tasks other than construction classify by their own tags.
        let task = base_task(PoolId::ADMIN, admin_method::FLUSH, TaskPrio::LowLatency, 0)
            .with_flush();
        assert_eq!(PrivateTaskMultiQueue::classify(&task), SubQueue::Flush);
    }

    #[test]
    fn test_push_places_into_single_queue() {
        let mut mq = PrivateTaskMultiQueue::new(8);
        assert!(mq.push(entry(user_task(TaskPrio::LowLatency, 2))));
        assert_eq!(mq.len(SubQueue::LowLat), 1);
        assert_eq!(mq.total_len(), 1);
    }

    #[test]
    fn test_push_respects_bound() {
        let mut mq = PrivateTaskMultiQueue::new(1);
        assert!(mq.push(entry(user_task(TaskPrio::LowLatency, 2))));
        assert!(!mq.push(entry(user_task(TaskPrio::LowLatency, 2))));
        // A different class still has room.
        assert!(mq.push(entry(user_task(TaskPrio::HighLatency, 2))));
    }

    #[test]
    fn test_erase_removes_only_target() {
        let mut mq = PrivateTaskMultiQueue::new(8);
        let a = entry(user_task(TaskPrio::LowLatency, 2));
        let b = entry(user_task(TaskPrio::LowLatency, 2));
        mq.push(a.clone());
        mq.push(b.clone());
        assert!(mq.erase(SubQueue::LowLat, &a.task));
        assert!(!mq.erase(SubQueue::LowLat, &a.task));
        assert_eq!(mq.len(SubQueue::LowLat), 1);
    }

    #[test]
    fn test_block_then_unblock_reactivates() {
        let mut mq = PrivateTaskMultiQueue::new(8);
        let e = entry(user_task(TaskPrio::LowLatency, 2));
        e.task.set_blocked();
        mq.block(e.clone());
        assert_eq!(mq.blocked_len(), 1);
        assert_eq!(mq.total_len(), 0);

        let handle = mq.signal_handle();
        handle.signal(e.task.clone());
        assert!(mq.unblock());
        assert!(!mq.unblock());
        assert_eq!(mq.blocked_len(), 0);
        assert_eq!(mq.len(SubQueue::LowLat), 1);
        assert!(!e.task.is_blocked());
    }

    #[test]
    fn test_signal_before_block_is_not_lost() {
        let mut mq = PrivateTaskMultiQueue::new(8);
        let e = entry(user_task(TaskPrio::LowLatency, 2));
        e.task.set_blocked();

        // The reply arrives before the worker parks the entry.
        mq.signal_handle().signal(e.task.clone());
        assert!(mq.unblock());
        mq.block(e.clone());

        // The entry went straight back to its runnable queue.
        assert_eq!(mq.blocked_len(), 0);
        assert_eq!(mq.len(SubQueue::LowLat), 1);
        assert!(!e.task.is_blocked());
    }

    #[test]
    fn test_unblock_requeue_ignores_bound() {
        let mut mq = PrivateTaskMultiQueue::new(1);
        mq.push(entry(user_task(TaskPrio::LowLatency, 2)));

        let e = entry(user_task(TaskPrio::LowLatency, 2));
        e.task.set_blocked();
        mq.block(e.clone());
        mq.signal_handle().signal(e.task.clone());
        assert!(mq.unblock());
        // Re-activation lands even though the sub-queue is at its bound.
        assert_eq!(mq.len(SubQueue::LowLat), 2);
    }
}
