//! Container registry: pool and container lookup.
//!
//! A pool owns one container per selector plus a "static" container used
//! for remote-tagged tasks, whose execution must not depend on which
//! selector the task originally targeted. Lookup failure is a recoverable
//! condition (a construction race) unless the pool id itself is invalid.

use crate::error::RuntimeError;
use dashmap::DashMap;
use orcha_core::{Container, ContainerId, PoolId};
use std::sync::Arc;

/// Factory producing a container for a (pool, selector) pair.
pub type ContainerFactory =
    Arc<dyn Fn(PoolId, ContainerId) -> Arc<dyn Container> + Send + Sync>;

struct PoolEntry {
    static_container: Arc<dyn Container>,
    containers: DashMap<ContainerId, Arc<dyn Container>>,
}

/// Process-wide registry of pools, containers, and module factories.
#[derive(Default)]
pub struct ContainerRegistry {
    pools: DashMap<PoolId, PoolEntry>,
    modules: DashMap<String, ContainerFactory>,
}

impl ContainerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module factory under `name`.
    pub fn register_module(&self, name: impl Into<String>, factory: ContainerFactory) {
        self.modules.insert(name.into(), factory);
    }

    /// Is a factory registered under `name`?
    pub fn has_module(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Construct and register a container from a module factory.
    ///
    /// Idempotent: if the (pool, selector) pair already has a container, the
    /// existing one is returned.
    pub fn create_container(
        &self,
        module: &str,
        pool: PoolId,
        selector: ContainerId,
    ) -> Result<Arc<dyn Container>, RuntimeError> {
        if let Some(existing) = self.get_container(pool, selector) {
            return Ok(existing);
        }
        let factory = self
            .modules
            .get(module)
            .ok_or_else(|| RuntimeError::UnknownModule(module.to_string()))?
            .clone();
        let container = factory(pool, selector);
        self.register_container(pool, selector, container.clone());
        Ok(container)
    }

    /// Register a container directly. The first container registered under a
    /// pool doubles as the pool's static container.
    pub fn register_container(
        &self,
        pool: PoolId,
        selector: ContainerId,
        container: Arc<dyn Container>,
    ) {
        let entry = self.pools.entry(pool).or_insert_with(|| PoolEntry {
            static_container: container.clone(),
            containers: DashMap::new(),
        });
        entry.containers.insert(selector, container);
    }

    /// The container registered under (pool, selector), if constructed.
    pub fn get_container(
        &self,
        pool: PoolId,
        selector: ContainerId,
    ) -> Option<Arc<dyn Container>> {
        let entry = self.pools.get(&pool)?;
        let container = entry.containers.get(&selector)?;
        Some(container.clone())
    }

    /// The pool's static container, used for remote-tagged tasks.
    pub fn get_static_container(&self, pool: PoolId) -> Option<Arc<dyn Container>> {
        let entry = self.pools.get(&pool)?;
        Some(entry.static_container.clone())
    }

    /// Does the pool exist at all?
    pub fn pool_exists(&self, pool: PoolId) -> bool {
        self.pools.contains_key(&pool)
    }

    /// Number of containers constructed under `pool`.
    pub fn container_count(&self, pool: PoolId) -> usize {
        self.pools
            .get(&pool)
            .map(|entry| entry.containers.len())
            .unwrap_or(0)
    }

    /// Tear a pool down, dropping its containers.
    pub fn destroy_pool(&self, pool: PoolId) -> bool {
        self.pools.remove(&pool).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orcha_core::{
        ContainerId, Lane, LaneId, MethodId, RunContext, Task, TaskError, TaskRef, TaskStep,
    };

    struct NopContainer;

    impl Container for NopContainer {
        fn route(&self, _task: &Task) -> Lane {
            Lane::new(LaneId(0), 0)
        }

        fn run(
            &self,
            _method: MethodId,
            task: &TaskRef,
            _rctx: &mut RunContext,
        ) -> Result<TaskStep, TaskError> {
            task.set_module_complete();
            Ok(TaskStep::Done)
        }
    }

    #[test]
    fn test_lookup_absent_pool() {
        let registry = ContainerRegistry::new();
        assert!(!registry.pool_exists(PoolId::FIRST_USER));
        assert!(registry.get_container(PoolId::FIRST_USER, ContainerId(0)).is_none());
        assert!(registry.get_static_container(PoolId::FIRST_USER).is_none());
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ContainerRegistry::new();
        registry.register_container(PoolId::FIRST_USER, ContainerId(2), Arc::new(NopContainer));
        assert!(registry.pool_exists(PoolId::FIRST_USER));
        assert!(registry.get_container(PoolId::FIRST_USER, ContainerId(2)).is_some());
        // First registration doubles as the static container.
        assert!(registry.get_static_container(PoolId::FIRST_USER).is_some());
        // Other selectors are still a construction race.
        assert!(registry.get_container(PoolId::FIRST_USER, ContainerId(3)).is_none());
    }

    #[test]
    fn test_factory_create_is_idempotent() {
        let registry = ContainerRegistry::new();
        registry.register_module(
            "nop",
            Arc::new(|_pool, _sel| Arc::new(NopContainer) as Arc<dyn Container>),
        );
        let a = registry
            .create_container("nop", PoolId::FIRST_USER, ContainerId(0))
            .unwrap();
        let b = registry
            .create_container("nop", PoolId::FIRST_USER, ContainerId(0))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.container_count(PoolId::FIRST_USER), 1);
    }

    #[test]
    fn test_unknown_module() {
        let registry = ContainerRegistry::new();
        let err = registry
            .create_container("missing", PoolId::FIRST_USER, ContainerId(0))
            .err()
            .unwrap();
        assert!(matches!(err, RuntimeError::UnknownModule(_)));
    }

    #[test]
    fn test_destroy_pool() {
        let registry = ContainerRegistry::new();
        registry.register_container(PoolId::FIRST_USER, ContainerId(0), Arc::new(NopContainer));
        assert!(registry.destroy_pool(PoolId::FIRST_USER));
        assert!(!registry.pool_exists(PoolId::FIRST_USER));
        assert!(!registry.destroy_pool(PoolId::FIRST_USER));
    }
}
