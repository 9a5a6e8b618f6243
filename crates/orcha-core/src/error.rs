//! Task-level error types.

use crate::task::{MethodId, PoolId};

/// Errors surfaced by a container while executing a task body.
///
/// These describe the failure of a single task, never of the worker that ran
/// it; the engine catches them at the execution boundary, logs them, and
/// completes the task's lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The task targets a pool that does not exist.
    #[error("pool {0} does not exist")]
    PoolNotFound(PoolId),

    /// The container does not implement the requested method.
    #[error("pool {pool} has no method {method}")]
    UnknownMethod {
        /// Pool the task was addressed to
        pool: PoolId,
        /// The unrecognized operation selector
        method: MethodId,
    },

    /// The task was submitted without the payload its method requires.
    #[error("task payload missing or of the wrong type")]
    PayloadMissing,

    /// The task body failed with a module-specific error.
    #[error("task failed: {0}")]
    Failed(String),
}
