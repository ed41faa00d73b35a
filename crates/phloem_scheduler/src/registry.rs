//! Worker registry: the allocator's view of the cluster.
//!
//! Holds every known worker, its capability set, its bounded task queue, and
//! the global task -> worker assignment map, together with an inverted
//! capability index (`token -> worker ids`) so that capability-constrained
//! lookups touch only the workers that claim the token.

use indexmap::IndexMap;
use phloem_ids::{TaskId, WorkerId};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Projection of a task held by the allocator: just what assignment and
/// rebalancing need.
#[derive(Debug, Clone)]
pub struct TaskSlot {
    pub task_id: TaskId,
    pub required: HashSet<String>,
}

/// A worker known to the allocator.
///
/// `queued` holds the tasks assigned but not yet completed, ordered from
/// oldest to youngest.
#[derive(Debug, Clone)]
pub struct WorkerHolder {
    pub worker_id: WorkerId,
    pub capabilities: HashSet<String>,
    pub queue_size: u32,
    pub(crate) queued: IndexMap<TaskId, TaskSlot>,
}

impl WorkerHolder {
    fn new(worker_id: WorkerId, capabilities: HashSet<String>, queue_size: u32) -> Self {
        Self {
            worker_id,
            capabilities,
            queue_size,
            queued: IndexMap::new(),
        }
    }

    pub fn n_tasks(&self) -> usize {
        self.queued.len()
    }

    pub fn n_free(&self) -> usize {
        (self.queue_size as usize).saturating_sub(self.n_tasks())
    }
}

/// Per-worker snapshot returned by [`WorkerRegistry::statistics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatistics {
    pub free: u32,
    pub sent: u32,
    pub capabilities: BTreeSet<String>,
}

/// The allocator's mutable state. All operations are synchronous and
/// non-suspending; the scheduler loop serializes access.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerId, WorkerHolder>,
    task_to_worker: HashMap<TaskId, WorkerId>,
    capability_index: HashMap<String, HashSet<WorkerId>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a worker. Returns false without mutating on a duplicate id.
    pub fn add_worker(
        &mut self,
        worker_id: WorkerId,
        capabilities: HashSet<String>,
        queue_size: u32,
    ) -> bool {
        if self.workers.contains_key(&worker_id) {
            return false;
        }

        for token in &capabilities {
            self.capability_index
                .entry(token.clone())
                .or_default()
                .insert(worker_id);
        }
        self.workers
            .insert(worker_id, WorkerHolder::new(worker_id, capabilities, queue_size));

        true
    }

    /// Remove a worker and return its queued task ids. The returned tasks are
    /// no longer tracked anywhere; the caller must reassign or fail them.
    /// Unknown ids return an empty list.
    pub fn remove_worker(&mut self, worker_id: WorkerId) -> Vec<TaskId> {
        let Some(worker) = self.workers.remove(&worker_id) else {
            return Vec::new();
        };

        for token in &worker.capabilities {
            if let Some(bucket) = self.capability_index.get_mut(token) {
                bucket.remove(&worker_id);
                // Empty buckets are dropped so the index key set stays equal
                // to the tokens currently claimed by some worker.
                if bucket.is_empty() {
                    self.capability_index.remove(token);
                }
            }
        }

        let task_ids: Vec<TaskId> = worker.queued.keys().copied().collect();
        for task_id in &task_ids {
            self.task_to_worker.remove(task_id);
        }

        task_ids
    }

    pub fn worker_ids(&self) -> HashSet<WorkerId> {
        self.workers.keys().copied().collect()
    }

    pub fn n_workers(&self) -> usize {
        self.workers.len()
    }

    /// The worker a task is assigned to, or the invalid sentinel.
    pub fn worker_by_task_id(&self, task_id: TaskId) -> WorkerId {
        self.task_to_worker
            .get(&task_id)
            .copied()
            .unwrap_or(WorkerId::INVALID)
    }

    /// The queued task ids of a worker, oldest first. Empty for unknown ids.
    pub fn queued_task_ids(&self, worker_id: WorkerId) -> Vec<TaskId> {
        self.workers
            .get(&worker_id)
            .map(|worker| worker.queued.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Assign a task to the least-loaded worker whose capabilities cover
    /// `required` and which has a free queue slot. Ties break on the lowest
    /// worker id. Returns the invalid sentinel, leaving all state untouched,
    /// when no worker qualifies.
    pub fn assign_task(&mut self, task_id: TaskId, required: HashSet<String>) -> WorkerId {
        let Some(chosen) = self.select_worker(&required) else {
            return WorkerId::INVALID;
        };

        if let Some(worker) = self.workers.get_mut(&chosen) {
            worker.queued.insert(task_id, TaskSlot { task_id, required });
            self.task_to_worker.insert(task_id, chosen);
        }

        chosen
    }

    /// Remove a task from its worker's queue and the assignment map.
    /// Returns the previous worker, or the invalid sentinel when unknown.
    pub fn remove_task(&mut self, task_id: TaskId) -> WorkerId {
        let Some(worker_id) = self.task_to_worker.remove(&task_id) else {
            return WorkerId::INVALID;
        };

        if let Some(worker) = self.workers.get_mut(&worker_id) {
            worker.queued.shift_remove(&task_id);
        }

        worker_id
    }

    /// True iff at least one worker covering `required` has a free slot.
    pub fn has_available_worker(&self, required: &HashSet<String>) -> bool {
        self.matching_worker_ids(required)
            .iter()
            .any(|id| self.workers[id].n_free() > 0)
    }

    /// Per-worker free/sent counts and capability sets. O(|workers|).
    pub fn statistics(&self) -> HashMap<WorkerId, WorkerStatistics> {
        self.workers
            .values()
            .map(|worker| {
                (
                    worker.worker_id,
                    WorkerStatistics {
                        free: worker.n_free() as u32,
                        sent: worker.n_tasks() as u32,
                        capabilities: worker.capabilities.iter().cloned().collect(),
                    },
                )
            })
            .collect()
    }

    pub(crate) fn workers(&self) -> &HashMap<WorkerId, WorkerHolder> {
        &self.workers
    }

    fn select_worker(&self, required: &HashSet<String>) -> Option<WorkerId> {
        let mut best: Option<(usize, WorkerId)> = None;
        for worker_id in self.matching_worker_ids(required) {
            let worker = &self.workers[&worker_id];
            if worker.n_free() == 0 {
                continue;
            }
            let key = (worker.n_tasks(), worker_id);
            if best.map_or(true, |current| key < current) {
                best = Some(key);
            }
        }
        best.map(|(_, worker_id)| worker_id)
    }

    /// Workers whose capabilities cover `required`, via the inverted index.
    /// Any token unknown cluster-wide short-circuits to no candidates.
    fn matching_worker_ids(&self, required: &HashSet<String>) -> Vec<WorkerId> {
        if required
            .iter()
            .any(|token| !self.capability_index.contains_key(token))
        {
            return Vec::new();
        }

        let mut matching: HashSet<WorkerId> = self.workers.keys().copied().collect();
        for token in required {
            if let Some(bucket) = self.capability_index.get(token) {
                matching.retain(|id| bucket.contains(id));
            }
        }

        matching.into_iter().collect()
    }
}
