//! Container-internal routing buckets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an ingress lane.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct LaneId(pub u64);

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A routing bucket inside a container.
///
/// Many tasks hash to one lane; a lane is bound to exactly one worker at a
/// time. The binding is what makes two tasks that route to the same lane
/// observable by the same worker.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Lane {
    /// The ingress lane this bucket drains through
    pub ingress_id: LaneId,
    /// The worker currently bound to that ingress lane
    pub worker_id: u32,
}

impl Lane {
    /// Create a lane bound to `worker_id` and fed by `ingress_id`.
    pub fn new(ingress_id: LaneId, worker_id: u32) -> Self {
        Self {
            ingress_id,
            worker_id,
        }
    }
}
