//! Domain query resolution.

use crate::registry::ContainerRegistry;
use orcha_core::{ContainerId, DomainQuery, NodeId, PoolId, ResolvedDomainQuery};
use std::sync::Arc;

/// Maps a routing descriptor to the concrete (node, query) targets that
/// should receive the task.
///
/// Contract: a well-formed query resolves to at least one target. Entries
/// whose node equals the local node are eligible for local execution.
pub trait DomainQueryResolver: Send + Sync {
    /// Resolve `query` against the deployment topology.
    fn resolve(
        &self,
        pool: PoolId,
        query: &DomainQuery,
        allow_remote: bool,
    ) -> Vec<ResolvedDomainQuery>;
}

/// Single-node resolver: every query maps onto this node.
///
/// Hash selections are pinned to a concrete container by taking the hash
/// modulo the pool's constructed container count; while a pool is still
/// under construction the hash pins to container zero, and the execution
/// path's retry handles the race.
pub struct StaticResolver {
    node: NodeId,
    registry: Arc<ContainerRegistry>,
}

impl StaticResolver {
    /// A resolver for a deployment consisting only of `node`.
    pub fn new(node: NodeId, registry: Arc<ContainerRegistry>) -> Self {
        Self { node, registry }
    }
}

impl DomainQueryResolver for StaticResolver {
    fn resolve(
        &self,
        pool: PoolId,
        query: &DomainQuery,
        _allow_remote: bool,
    ) -> Vec<ResolvedDomainQuery> {
        if query.is_local_id() {
            return vec![ResolvedDomainQuery {
                node: self.node,
                query: *query,
            }];
        }
        let count = self.registry.container_count(pool).max(1);
        let hash = query.selector_hash().unwrap_or(0);
        vec![ResolvedDomainQuery {
            node: self.node,
            query: DomainQuery::local_id(ContainerId((hash % count as u64) as u32)),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_id_passthrough() {
        let registry = Arc::new(ContainerRegistry::new());
        let resolver = StaticResolver::new(NodeId(4), registry);
        let query = DomainQuery::local_id(ContainerId(2));
        let resolved = resolver.resolve(PoolId::FIRST_USER, &query, false);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].node, NodeId(4));
        assert_eq!(resolved[0].query, query);
    }

    #[test]
    fn test_hash_pins_to_container_zero_when_pool_empty() {
        let registry = Arc::new(ContainerRegistry::new());
        let resolver = StaticResolver::new(NodeId(0), registry);
        let resolved =
            resolver.resolve(PoolId::FIRST_USER, &DomainQuery::local_hash(1234), false);
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].query.is_local_id());
        assert_eq!(resolved[0].query.selector_id(), Some(ContainerId(0)));
    }
}
