//! Orcha core task model
//!
//! This crate defines the leaf data types shared between clients and the
//! worker engine:
//! - Task identity, priority, and the atomic state-flag bitset
//! - Routing descriptors (domain queries) and container lanes
//! - The per-execution run context and reusable coroutine frames
//! - The container contract implemented by task modules
//! - Shared-buffer handles and the allocator reply protocol

#![warn(rust_2018_idioms)]

pub mod container;
pub mod context;
pub mod domain;
pub mod error;
pub mod handle;
pub mod lane;
pub mod task;

pub use container::{Container, MonitorMode, TaskStep};
pub use context::{CoroFrame, FlushCounters, RunContext};
pub use domain::{ContainerId, DomainQuery, NodeId, ResolvedDomainQuery};
pub use error::TaskError;
pub use handle::{AllocReply, BufferAllocator, ShmHandle};
pub use lane::{Lane, LaneId};
pub use task::{
    admin_method, MethodId, PoolId, Task, TaskId, TaskNode, TaskPrio, TaskProps, TaskRef,
};
