//! Routing descriptors and their resolved forms.
//!
//! A `DomainQuery` names where a task wants to run without saying which
//! node or container will actually run it. Resolution (performed by the
//! deployment's `DomainQueryResolver`) turns one query into one or more
//! `(node, concrete query)` pairs; a query that resolves to a single
//! local direct-id target is eligible for in-place execution.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a node in the deployment.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a container within a pool.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ContainerId(pub u32);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Selector half of a domain query.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum QuerySelector {
    /// A concrete container id
    Id(ContainerId),
    /// A hash still pending a concrete mapping
    Hash(u64),
}

/// A routing descriptor: scope flags plus a selector.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DomainQuery {
    flags: u32,
    sel: QuerySelector,
}

impl DomainQuery {
    /// The query targets the local node.
    pub const LOCAL: u32 = 1 << 0;

    /// The query targets every node in the deployment.
    pub const GLOBAL: u32 = 1 << 1;

    /// The selector is a concrete container id.
    pub const ID: u32 = 1 << 2;

    /// The selector is a hash pending concrete mapping.
    pub const HASH: u32 = 1 << 3;

    /// A query already pinned to one container on this node.
    pub fn local_id(id: ContainerId) -> Self {
        Self {
            flags: Self::LOCAL | Self::ID,
            sel: QuerySelector::Id(id),
        }
    }

    /// A query for one local container chosen by hash.
    pub fn local_hash(hash: u64) -> Self {
        Self {
            flags: Self::LOCAL | Self::HASH,
            sel: QuerySelector::Hash(hash),
        }
    }

    /// A query addressing every container of the pool, deployment-wide.
    pub fn global_bcast() -> Self {
        Self {
            flags: Self::GLOBAL | Self::HASH,
            sel: QuerySelector::Hash(0),
        }
    }

    /// Raw flag bits.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// True if all bits in `mask` are set.
    pub fn flags_all(&self, mask: u32) -> bool {
        self.flags & mask == mask
    }

    /// Resolved to a single local container by direct id?
    pub fn is_local_id(&self) -> bool {
        self.flags_all(Self::LOCAL | Self::ID)
    }

    /// The direct container id, if this is an id selection.
    pub fn selector_id(&self) -> Option<ContainerId> {
        match self.sel {
            QuerySelector::Id(id) => Some(id),
            QuerySelector::Hash(_) => None,
        }
    }

    /// The pending hash, if this is a hash selection.
    pub fn selector_hash(&self) -> Option<u64> {
        match self.sel {
            QuerySelector::Hash(h) => Some(h),
            QuerySelector::Id(_) => None,
        }
    }
}

impl fmt::Display for DomainQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = if self.flags & Self::GLOBAL != 0 {
            "global"
        } else {
            "local"
        };
        match self.sel {
            QuerySelector::Id(id) => write!(f, "{}:id={}", scope, id),
            QuerySelector::Hash(h) => write!(f, "{}:hash={}", scope, h),
        }
    }
}

/// One concrete target produced by resolving a `DomainQuery`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ResolvedDomainQuery {
    /// The node that should receive the task
    pub node: NodeId,
    /// The concretized query to carry along
    pub query: DomainQuery,
}
