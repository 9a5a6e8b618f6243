//! The runtime context object.
//!
//! One `Runtime` is constructed at process init and passed by reference to
//! everything that needs engine access; it is torn down at shutdown and
//! never reconstructed mid-run.

use crate::admin::AdminContainer;
use crate::client::Client;
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::ingress::IngressSet;
use crate::orchestrator::{EngineShared, WorkOrchestrator};
use crate::registry::ContainerRegistry;
use crate::remote::{NullRemoteClient, RemoteQueueClient};
use crate::resolver::{DomainQueryResolver, StaticResolver};
use orcha_core::{
    admin_method, ContainerId, DomainQuery, NodeId, PoolId, Task, TaskNode, TaskPrio, TaskRef,
};
use std::sync::Arc;

/// A fully-wired engine instance.
pub struct Runtime {
    shared: Arc<EngineShared>,
    orchestrator: Arc<WorkOrchestrator>,
    client: Client,
}

impl Runtime {
    /// Build a single-node runtime with the default resolver and no remote
    /// transport.
    pub fn create(config: RuntimeConfig) -> Result<Arc<Self>, RuntimeError> {
        let registry = Arc::new(ContainerRegistry::new());
        let resolver = Arc::new(StaticResolver::new(NodeId(config.node_id), registry.clone()));
        Self::with_collaborators(config, registry, resolver, Arc::new(NullRemoteClient))
    }

    /// Build a runtime around external collaborators (resolver and remote
    /// transport supplied by the deployment).
    pub fn with_collaborators(
        config: RuntimeConfig,
        registry: Arc<ContainerRegistry>,
        resolver: Arc<dyn DomainQueryResolver>,
        remote: Arc<dyn RemoteQueueClient>,
    ) -> Result<Arc<Self>, RuntimeError> {
        let workers = config.worker_count();
        let ingress = Arc::new(IngressSet::new(
            workers,
            config.proc_queue_depth,
            config.queue_depth,
        ));
        let shared = Arc::new(EngineShared {
            node_id: NodeId(config.node_id),
            registry: registry.clone(),
            resolver,
            remote,
            ingress: ingress.clone(),
            config,
        });
        let orchestrator = WorkOrchestrator::new(shared.clone());
        // The admin pool exists from the start so containers can be
        // constructed before any user pool does.
        let admin = AdminContainer::new(
            registry.clone(),
            Arc::downgrade(&orchestrator),
            ingress.lane_group(TaskPrio::LowLatency),
        );
        registry.register_container(PoolId::ADMIN, ContainerId(0), Arc::new(admin));
        let client = Client::new(shared.clone());
        Ok(Arc::new(Self {
            shared,
            orchestrator,
            client,
        }))
    }

    /// Start the worker pool.
    pub fn start(&self) -> Result<(), RuntimeError> {
        self.orchestrator.start()
    }

    /// The submission client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The container registry.
    pub fn registry(&self) -> &Arc<ContainerRegistry> {
        &self.shared.registry
    }

    /// The worker pool.
    pub fn orchestrator(&self) -> &Arc<WorkOrchestrator> {
        &self.orchestrator
    }

    /// This node's identity.
    pub fn node_id(&self) -> NodeId {
        self.shared.node_id
    }

    /// The running configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// The routing table containers build their lane groups from: one lane
    /// of the given priority per worker.
    pub fn lane_group(&self, prio: TaskPrio) -> Vec<orcha_core::Lane> {
        self.shared.ingress.lane_group(prio)
    }

    /// An admin task addressed at this node's admin container.
    fn admin_task(&self, method: orcha_core::MethodId) -> Task {
        Task::new(
            TaskNode::new_root(),
            PoolId::ADMIN,
            method,
            TaskPrio::LowLatency,
            DomainQuery::local_id(ContainerId(0)),
        )
    }

    /// Construct a container from a registered module, waiting for the
    /// construction task to complete.
    pub fn create_container(
        &self,
        module: &str,
        pool: PoolId,
        selector: ContainerId,
    ) -> Result<(), RuntimeError> {
        let task: TaskRef = Arc::new(self.admin_task(admin_method::CREATE_CONTAINER).with_payload(
            crate::admin::CreateContainerParams {
                module: module.to_string(),
                pool,
                selector,
            },
        ));
        self.client.schedule_task(task.clone())?;
        task.wait_complete();
        Ok(())
    }

    /// Drive the whole worker pool to quiescence and return once the flush
    /// barrier has converged.
    pub fn flush(&self) -> Result<(), RuntimeError> {
        let task: TaskRef = Arc::new(self.admin_task(admin_method::FLUSH).with_flush());
        self.client.schedule_task(task.clone())?;
        task.wait_complete();
        Ok(())
    }

    /// Stop the worker pool and wait for every worker to exit.
    pub fn shutdown(&self) {
        self.orchestrator.finalize();
        self.orchestrator.join();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal shared state for unit tests that need a client without a
    /// running pool.
    pub(crate) fn bare_shared(workers: usize) -> Arc<EngineShared> {
        let config = RuntimeConfig {
            workers,
            ..RuntimeConfig::default()
        };
        let registry = Arc::new(ContainerRegistry::new());
        Arc::new(EngineShared {
            node_id: NodeId(0),
            resolver: Arc::new(StaticResolver::new(NodeId(0), registry.clone())),
            registry,
            remote: Arc::new(NullRemoteClient),
            ingress: Arc::new(IngressSet::new(workers, 64, 64)),
            config,
        })
    }

    #[test]
    fn test_runtime_wires_admin_pool() {
        let runtime = Runtime::create(RuntimeConfig {
            workers: 1,
            ..RuntimeConfig::default()
        })
        .unwrap();
        assert!(runtime.registry().pool_exists(PoolId::ADMIN));
        assert!(runtime
            .registry()
            .get_static_container(PoolId::ADMIN)
            .is_some());
    }

    #[test]
    fn test_runtime_shutdown_without_start() {
        let runtime = Runtime::create(RuntimeConfig {
            workers: 1,
            ..RuntimeConfig::default()
        })
        .unwrap();
        // No workers were started; shutdown must still be safe.
        runtime.shutdown();
    }
}
