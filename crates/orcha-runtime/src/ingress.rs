//! Ingress lanes: the admission surface through which tasks enter workers.
//!
//! Lanes are bounded multi-producer queues, each bound to exactly one
//! worker. Client-facing process lanes take root submissions whose routing
//! is not yet pinned; the internal per-priority lane groups are the lanes
//! container routing tables reference, so a correctly-routed task arrives
//! on the lane its container maps it to and runs without another hop.

use orcha_core::{Lane, LaneId, TaskPrio, TaskRef};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;

/// An ingress lane rejected a task because it is at capacity.
#[derive(Debug, thiserror::Error)]
#[error("ingress lane is full")]
pub struct LaneFull;

/// A bounded queue of pending task references feeding one worker.
pub struct IngressLane {
    id: LaneId,
    depth: usize,
    entries: Mutex<VecDeque<TaskRef>>,
}

impl IngressLane {
    /// Create a lane holding at most `depth` tasks.
    pub fn new(id: LaneId, depth: usize) -> Self {
        Self {
            id,
            depth,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// This lane's identity.
    pub fn id(&self) -> LaneId {
        self.id
    }

    /// Enqueue a task; fails when the lane is full.
    pub fn emplace(&self, task: TaskRef) -> Result<(), LaneFull> {
        let mut entries = self.entries.lock();
        if entries.len() >= self.depth {
            return Err(LaneFull);
        }
        entries.push_back(task);
        Ok(())
    }

    /// The task at the head of the lane, if any. An empty reply is the
    /// drain-stop condition for ingestion.
    pub fn peek(&self) -> Option<TaskRef> {
        self.entries.lock().front().cloned()
    }

    /// Remove the task at the head of the lane.
    pub fn pop(&self) -> Option<TaskRef> {
        self.entries.lock().pop_front()
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Is the lane empty?
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Which ingestion cadence a lane gets inside the worker loop.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LaneKind {
    /// Client-facing process lane, ingested once per iteration
    Process,
    /// Internal lane, ingested on every fast-path round
    Internal,
}

/// Binds an ingress lane to the worker that must poll it.
#[derive(Clone)]
pub struct WorkEntry {
    /// The lane to drain
    pub lane: Arc<IngressLane>,
    /// Its ingestion cadence
    pub kind: LaneKind,
}

/// The full admission surface: one process lane plus one internal lane per
/// priority, per worker, bound round-robin so lane `i` belongs to worker
/// `i`.
pub struct IngressSet {
    proc: Vec<Arc<IngressLane>>,
    low_lat: Vec<Arc<IngressLane>>,
    high_lat: Vec<Arc<IngressLane>>,
    by_id: FxHashMap<LaneId, Arc<IngressLane>>,
}

impl IngressSet {
    /// Build lanes for `workers` workers.
    pub fn new(workers: usize, proc_depth: usize, depth: usize) -> Self {
        let mut next_id = 0u64;
        let mut make_group = |count: usize, depth: usize| {
            (0..count)
                .map(|_| {
                    let lane = Arc::new(IngressLane::new(LaneId(next_id), depth));
                    next_id += 1;
                    lane
                })
                .collect::<Vec<_>>()
        };
        let proc = make_group(workers, proc_depth);
        let low_lat = make_group(workers, depth);
        let high_lat = make_group(workers, depth);
        let mut by_id = FxHashMap::default();
        for lane in proc.iter().chain(&low_lat).chain(&high_lat) {
            by_id.insert(lane.id(), lane.clone());
        }
        Self {
            proc,
            low_lat,
            high_lat,
            by_id,
        }
    }

    /// Number of workers the surface was built for.
    pub fn workers(&self) -> usize {
        self.proc.len()
    }

    /// The process lane bound to `worker`.
    pub fn proc_lane(&self, worker: u32) -> &Arc<IngressLane> {
        &self.proc[worker as usize % self.proc.len()]
    }

    /// The internal lane of the given priority bound to `worker`.
    pub fn internal_lane(&self, prio: TaskPrio, worker: u32) -> &Arc<IngressLane> {
        let group = match prio {
            TaskPrio::LowLatency => &self.low_lat,
            TaskPrio::HighLatency => &self.high_lat,
        };
        &group[worker as usize % group.len()]
    }

    /// Look a lane up by id.
    pub fn lane_by_id(&self, id: LaneId) -> Option<&Arc<IngressLane>> {
        self.by_id.get(&id)
    }

    /// The process lane chosen for an unpinned submission.
    pub fn hash_lane(&self, hash: u64) -> &Arc<IngressLane> {
        &self.proc[hash as usize % self.proc.len()]
    }

    /// The routing table containers build their lane groups from: one lane
    /// of the given priority per worker.
    pub fn lane_group(&self, prio: TaskPrio) -> Vec<Lane> {
        (0..self.workers() as u32)
            .map(|w| Lane::new(self.internal_lane(prio, w).id(), w))
            .collect()
    }

    /// Every lane bound to `worker`, as work entries for its poll list.
    pub fn work_entries_for(&self, worker: u32) -> Vec<WorkEntry> {
        vec![
            WorkEntry {
                lane: self.proc_lane(worker).clone(),
                kind: LaneKind::Process,
            },
            WorkEntry {
                lane: self.internal_lane(TaskPrio::LowLatency, worker).clone(),
                kind: LaneKind::Internal,
            },
            WorkEntry {
                lane: self.internal_lane(TaskPrio::HighLatency, worker).clone(),
                kind: LaneKind::Internal,
            },
        ]
    }
}
