//! Even-load allocation policy.
//!
//! Workers declare a capability set; tasks route to the least-loaded worker
//! whose set covers the task's required tokens. Resource values never enter
//! the picture.

use crate::registry::{WorkerRegistry, WorkerStatistics};
use crate::rebalance;
use phloem_ids::{TaskId, WorkerId};
use phloem_protocol::Task;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct EvenLoadPolicy {
    registry: WorkerRegistry,
}

impl EvenLoadPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent on duplicate ids: returns false without mutation.
    pub fn add_worker(
        &mut self,
        worker_id: WorkerId,
        capabilities: HashSet<String>,
        queue_size: u32,
    ) -> bool {
        self.registry.add_worker(worker_id, capabilities, queue_size)
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
