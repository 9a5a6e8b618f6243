//! Runtime error types.

use crate::remote::RemoteError;
use orcha_core::{DomainQuery, LaneId, PoolId, TaskError};

/// Errors that can occur while configuring, starting, or feeding the engine.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// File I/O error while loading configuration
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration file
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    /// A domain query resolved to zero targets. Fatal for that task: a
    /// well-formed query must always resolve to at least one target.
    #[error("query {query} for pool {pool} resolved to no targets")]
    UnresolvableQuery {
        /// Pool the query was scoped to
        pool: PoolId,
        /// The descriptor that failed to resolve
        query: DomainQuery,
    },

    /// An ingress lane rejected a submission because it is full.
    #[error("ingress lane {lane} is full")]
    Backpressure {
        /// The lane that rejected the task
        lane: LaneId,
    },

    /// The named module has no registered factory.
    #[error("module {0} is not registered")]
    UnknownModule(String),

    /// Task-level failure bubbled out of a synchronous helper.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Remote transport failure.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}
