//! Orcha worker scheduling engine
//!
//! The runtime half of Orcha: bounded ingress lanes feed per-core workers;
//! each worker classifies its tasks into a private multi-queue, decides
//! whether a task runs here, on another local worker, or on a remote node,
//! and drives task bodies as cooperatively-suspended executions on pooled
//! coroutine frames. A two-phase barrier detects pool-wide quiescence for
//! flush and shutdown.

#![warn(rust_2018_idioms)]

pub mod admin;
pub mod classifier;
pub mod client;
pub mod config;
pub mod error;
pub mod ingress;
pub mod orchestrator;
pub mod registry;
pub mod remote;
pub mod resolver;
pub mod runtime;
pub mod stack;
pub mod worker;

pub use admin::{AdminContainer, CreateContainerParams, DestroyContainerParams};
pub use classifier::{PrivateTaskMultiQueue, PrivateTaskQueueEntry, SubQueue, UnblockSignal};
pub use client::Client;
pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use ingress::{IngressLane, IngressSet, LaneFull, LaneKind, WorkEntry};
pub use orchestrator::{EngineShared, WorkOrchestrator};
pub use registry::{ContainerFactory, ContainerRegistry};
pub use remote::{NullRemoteClient, RemoteError, RemoteQueueClient};
pub use resolver::{DomainQueryResolver, StaticResolver};
pub use runtime::Runtime;
pub use stack::StackPool;
pub use worker::{TaskRouteMode, Worker};
