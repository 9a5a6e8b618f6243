//! Built-in admin container.
//!
//! The admin pool carries the runtime's own control traffic: container
//! construction (the class the classifier's construction queue protects),
//! pool teardown, flush, and shutdown. It exists in every deployment, so
//! containers can be constructed before any user pool exists.

use crate::orchestrator::WorkOrchestrator;
use crate::registry::ContainerRegistry;
use orcha_core::{
    admin_method, Container, ContainerId, Lane, MethodId, MonitorMode, PoolId, RunContext, Task,
    TaskError, TaskRef, TaskStep,
};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use tracing::info;

/// Input for [`admin_method::CREATE_CONTAINER`].
#[derive(Debug, Clone)]
pub struct CreateContainerParams {
    /// Registered module to construct from
    pub module: String,
    /// Pool to place the container under
    pub pool: PoolId,
    /// Selector of the new container
    pub selector: ContainerId,
}

/// Input for [`admin_method::DESTROY_CONTAINER`].
#[derive(Debug, Clone)]
pub struct DestroyContainerParams {
    /// Pool to tear down
    pub pool: PoolId,
}

/// The admin pool's container.
pub struct AdminContainer {
    registry: Arc<ContainerRegistry>,
    orchestrator: Weak<WorkOrchestrator>,
    lanes: Vec<Lane>,
}

impl AdminContainer {
    /// Build the admin container over the engine's lane group.
    pub fn new(
        registry: Arc<ContainerRegistry>,
        orchestrator: Weak<WorkOrchestrator>,
        lanes: Vec<Lane>,
    ) -> Self {
        Self {
            registry,
            orchestrator,
            lanes,
        }
    }

    fn create_container(&self, task: &TaskRef) -> Result<TaskStep, TaskError> {
        let params = task
            .take_payload::<CreateContainerParams>()
            .ok_or(TaskError::PayloadMissing)?;
        self.registry
            .create_container(&params.module, params.pool, params.selector)
            .map_err(|err| TaskError::Failed(err.to_string()))?;
        info!(
            pool = %params.pool,
            selector = %params.selector,
            module = %params.module,
            "container constructed"
        );
        task.set_module_complete();
        Ok(TaskStep::Done)
    }

    fn destroy_container(&self, task: &TaskRef) -> Result<TaskStep, TaskError> {
        let params = task
            .take_payload::<DestroyContainerParams>()
            .ok_or(TaskError::PayloadMissing)?;
        self.registry.destroy_pool(params.pool);
        task.set_module_complete();
        Ok(TaskStep::Done)
    }

    fn flush(&self, task: &TaskRef, rctx: &mut RunContext) -> Result<TaskStep, TaskError> {
        // The flush task completes only once the barrier has converged:
        // while the owning worker still reports flushing, stay pending so
        // the flush queue keeps driving rounds.
        let flushing = rctx
            .flush
            .as_ref()
            .map(|f| f.flushing.load(Ordering::Acquire))
            .unwrap_or(false);
        if !flushing {
            task.set_module_complete();
        }
        Ok(TaskStep::Done)
    }

    fn stop_runtime(&self, task: &TaskRef) -> Result<TaskStep, TaskError> {
        info!("stopping runtime");
        if let Some(orch) = self.orchestrator.upgrade() {
            orch.finalize();
        }
        task.set_module_complete();
        Ok(TaskStep::Done)
    }
}

impl Container for AdminContainer {
    fn route(&self, task: &Task) -> Lane {
        // Sticky per task graph so rerouting converges after one hop.
        let index = task.task_node().root.as_u64() as usize % self.lanes.len();
        self.lanes[index]
    }

    fn run(
        &self,
        method: MethodId,
        task: &TaskRef,
        rctx: &mut RunContext,
    ) -> Result<TaskStep, TaskError> {
        match method {
            admin_method::CREATE_CONTAINER => self.create_container(task),
            admin_method::DESTROY_CONTAINER => self.destroy_container(task),
            admin_method::FLUSH => self.flush(task, rctx),
            admin_method::STOP_RUNTIME => self.stop_runtime(task),
            other => Err(TaskError::UnknownMethod {
                pool: PoolId::ADMIN,
                method: other,
            }),
        }
    }

    fn monitor(&self, _mode: MonitorMode, _task: &TaskRef, _rctx: &mut RunContext) {}
}
