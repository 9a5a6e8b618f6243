//! The contract between the worker engine and task modules.

use crate::context::RunContext;
use crate::error::TaskError;
use crate::lane::Lane;
use crate::task::{MethodId, Task, TaskRef};

/// Outcome of driving a task body for one pass.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskStep {
    /// The body ran to the end of this invocation; the frame may be
    /// reclaimed. Whether the task is finished for good is signaled
    /// separately through the module-complete flag.
    Done,
    /// The body yielded voluntarily and wants another pass soon.
    Yielded,
    /// The body is waiting on a child or remote reply; the task parks until
    /// an unblock signal arrives.
    Blocked,
}

/// Lifecycle points at which the engine invokes a container's monitor hook.
///
/// Monitor hooks are side channels: they must never fail the task.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MonitorMode {
    /// A task graph is entering execution on this worker.
    BeginWork,
    /// A task graph finished execution on this worker.
    EndWork,
    /// A flush round wants statistics from a long-running task.
    FlushStat,
    /// Merge results from the replicas in `RunContext::replicas` into the
    /// origin task. Containers interpret their own replicas; the engine
    /// never looks inside them.
    ReplicaAgg,
}

/// A logical service instance: routes, executes, and observes its tasks.
pub trait Container: Send + Sync {
    /// Map a task to the internal lane (and therefore worker) it belongs to.
    ///
    /// Must be deterministic enough that the same lane keeps its binding
    /// while the task is in flight; internal state such as round-robin
    /// counters is fine.
    fn route(&self, task: &Task) -> Lane;

    /// Drive the task body for one pass.
    ///
    /// The body declares logical completion by setting the task's
    /// module-complete flag; returning [`TaskStep::Done`] without it leaves
    /// the task scheduled (long-running services do this every period).
    fn run(
        &self,
        method: MethodId,
        task: &TaskRef,
        rctx: &mut RunContext,
    ) -> Result<TaskStep, TaskError>;

    /// Lifecycle side channel; the default ignores every mode.
    fn monitor(&self, _mode: MonitorMode, _task: &TaskRef, _rctx: &mut RunContext) {}
}
