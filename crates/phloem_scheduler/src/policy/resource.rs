//! Resource-aware allocation policy.
//!
//! Semantically identical to the even-load policy from the dispatcher's
//! standpoint: a resource mapping's key set is the capability set. Metered
//! values (anything other than the unmetered sentinel) are not supported by
//! the allocator; they are accepted as plain required capabilities, with a
//! warning logged once at worker registration.

use crate::registry::{WorkerRegistry, WorkerStatistics};
use crate::rebalance;
use phloem_ids::{TaskId, WorkerId};
use phloem_protocol::types::UNMETERED;
use phloem_protocol::Task;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::warn;

#[derive(Debug, Default)]
pub struct ResourcePolicy {
    registry: WorkerRegistry,
}

impl ResourcePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent on duplicate ids: returns false without mutation.
    pub fn add_worker(
        &mut self,
        worker_id: WorkerId,
        resources: &BTreeMap<String, i64>,
        queue_size: u32,
    ) -> bool {
        if resources.values().any(|value| *value != UNMETERED) {
            warn!(
                worker = %worker_id,
                "allocate policy ignores metered worker resources: {:?}",
                resources
            );
        }

        self.registry
            .add_worker(worker_id, resources.keys().cloned().collect(), queue_size)
    }

    /// Returns the removed worker's queued task ids for reassignment.
    pub fn remove_worker(&mut self, worker_id: WorkerId) -> Vec<TaskId> {
        self.registry.remove_worker(worker_id)
    }

    pub fn worker_ids(&self) -> HashSet<WorkerId> {
        self.registry.worker_ids()
    }

    pub fn worker_by_task_id(&self, task_id: TaskId) -> WorkerId {
        self.registry.worker_by_task_id(task_id)
    }

    pub fn assign_task(&mut self, task: &Task) -> WorkerId {
        self.registry
            .assign_task(task.task_id, task.required_capabilities())
    }

    pub fn remove_task(&mut self, task_id: TaskId) -> WorkerId {
        self.registry.remove_task(task_id)
    }

    pub fn has_available_worker(&self, required: &HashSet<String>) -> bool {
        self.registry.has_available_worker(required)
    }

    pub fn balance(&self) -> HashMap<WorkerId, Vec<TaskId>> {
        rebalance::balance(&self.registry)
    }

    pub fn statistics(&self) -> HashMap<WorkerId, WorkerStatistics> {
        self.registry.statistics()
    }
}
