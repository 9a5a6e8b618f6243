//! Runtime configuration.

use crate::error::RuntimeError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Configuration for the worker engine.
///
/// Every field has a default, so a config file only needs the keys it wants
/// to override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Identity of this node in the deployment
    pub node_id: u32,

    /// Number of workers; 0 means one per CPU core
    pub workers: usize,

    /// Depth of the client-facing process lanes
    pub proc_queue_depth: usize,

    /// Depth of the internal per-priority lanes and of each private
    /// sub-queue
    pub queue_depth: usize,

    /// Coroutine frames pre-allocated per worker
    pub stack_pool_size: usize,

    /// Microseconds a worker sleeps between idle iterations; 0 yields the
    /// OS thread instead
    pub sleep_us: u64,

    /// Workers never sleep or yield between iterations (dedicated cores)
    pub continuous_polling: bool,

    /// Pin worker `i` to CPU `i`
    pub pin_workers: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            workers: 0,
            proc_queue_depth: 8192,
            queue_depth: 100_000,
            stack_pool_size: 16,
            sleep_us: 0,
            continuous_polling: false,
            pin_workers: false,
        }
    }
}

impl RuntimeConfig {
    /// Load a configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, RuntimeError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// The effective worker count.
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}
