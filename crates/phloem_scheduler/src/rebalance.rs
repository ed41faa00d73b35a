//! Idle-triggered, average-seeking task rebalancing.
//!
//! `balance` moves queued tasks from workers loaded above the cluster
//! average to workers loaded below it, youngest tasks first, subject to
//! capability constraints. It runs only when at least one worker is idle and
//! it never touches the live registry: the advice map tells the dispatcher
//! which tasks to evict from which worker, and the dispatcher reassigns them
//! through the normal assignment path.
//!
//! The algorithm is deliberately not optimal. With capability constraints a
//! perfect balance can require multi-hop moves (an assignment-problem
//! solver's territory); a single-hop pass keeps latency bounded and message
//! churn low. Worst case with constraints is
//! O(n_workers log n_workers + n_tasks * n_workers * n_tokens); without
//! constraints every task placement costs O(log n_workers).

use crate::registry::WorkerRegistry;
use indexmap::IndexMap;
use phloem_ids::{TaskId, WorkerId};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Working copy of a worker's queue. Mutated freely while the advice map is
/// being built up.
struct BalanceWorker {
    capabilities: HashSet<String>,
    queued: IndexMap<TaskId, HashSet<String>>,
}

impl BalanceWorker {
    fn n_tasks(&self) -> usize {
        self.queued.len()
    }
}

/// Compute, for every overloaded worker, the queued tasks to evict for
/// reassignment. Returns an empty map when no worker is idle or the cluster
/// is already balanced. Degenerate inputs never fail.
pub fn balance(registry: &WorkerRegistry) -> HashMap<WorkerId, Vec<TaskId>> {
    let workers = registry.workers();

    // Only rebalance when some worker sits completely idle.
    let has_idle_workers = workers.values().any(|worker| worker.n_tasks() == 0);
    if workers.is_empty() || !has_idle_workers {
        return HashMap::new();
    }

    let n_tasks: usize = workers.values().map(|worker| worker.n_tasks()).sum();
    let avg_tasks_per_worker = n_tasks as f64 / workers.len() as f64;

    let is_balanced = |n_tasks: usize| (n_tasks as f64 - avg_tasks_per_worker).abs() < 1.0;

    // Copy every unbalanced worker's queue; balanced workers are not touched.
    // The copies are kept sorted by (load, worker id) so popping the most
    // loaded worker and scanning receivers in load-ascending order are both
    // cheap and deterministic.
    let mut copies: HashMap<WorkerId, BalanceWorker> = HashMap::new();
    let mut by_load: BTreeSet<(usize, WorkerId)> = BTreeSet::new();

    for worker in workers.values() {
        if is_balanced(worker.n_tasks()) {
            continue;
        }
        by_load.insert((worker.n_tasks(), worker.worker_id));
        copies.insert(
            worker.worker_id,
            BalanceWorker {
                capabilities: worker.capabilities.clone(),
                queued: worker
                    .queued
                    .iter()
                    .map(|(task_id, slot)| (*task_id, slot.required.clone()))
                    .collect(),
            },
        );
    }

    let mut advice: HashMap<WorkerId, Vec<TaskId>> = HashMap::new();

    // Tasks no below-average worker could accept. Remembering them keeps a
    // worker that reappears in the loop from rescanning the same queue.
    let mut unbalanceable_tasks: HashSet<TaskId> = HashSet::new();

    while by_load.len() >= 2 {
        let Some(&(top_load, top_id)) = by_load.iter().next_back() else {
            break;
        };
        by_load.remove(&(top_load, top_id));

        if is_balanced(top_load) {
            // The most loaded remaining worker is not high-load, stop.
            break;
        }

        // Walk the popped worker's queue youngest-first, looking for the
        // least-loaded below-average worker that covers the task's tokens.
        let mut moved: Option<(TaskId, WorkerId)> = None;
        {
            let top = &copies[&top_id];
            for (task_id, required) in top.queued.iter().rev() {
                if unbalanceable_tasks.contains(task_id) {
                    continue;
                }

                let mut receiver = None;
                for (load, candidate_id) in by_load.iter() {
                    if *load as f64 >= avg_tasks_per_worker {
                        break;
                    }
                    if required.is_subset(&copies[candidate_id].capabilities) {
                        receiver = Some(*candidate_id);
                        break;
                    }
                }

                match receiver {
                    Some(receiver_id) => {
                        moved = Some((*task_id, receiver_id));
                        break;
                    }
                    None => {
                        unbalanceable_tasks.insert(*task_id);
                    }
                }
            }
        }

        // Nothing movable on this worker: drop it from the loop for good.
        let Some((task_id, receiver_id)) = moved else {
            continue;
        };

        advice.entry(top_id).or_default().push(task_id);

        let required = copies
            .get_mut(&top_id)
            .and_then(|top| top.queued.shift_remove(&task_id))
            .unwrap_or_default();

        let receiver_load = copies[&receiver_id].n_tasks();
        by_load.remove(&(receiver_load, receiver_id));
        if let Some(receiver) = copies.get_mut(&receiver_id) {
            receiver.queued.insert(task_id, required);
        }

        // Re-insert both workers iff they can be balanced further.
        let top_load = copies[&top_id].n_tasks();
        if !is_balanced(top_load) {
            by_load.insert((top_load, top_id));
        }
        let receiver_load = copies[&receiver_id].n_tasks();
        if !is_balanced(receiver_load) {
            by_load.insert((receiver_load, receiver_id));
        }
    }

    advice
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wid(last: u8) -> WorkerId {
        let mut bytes = [0u8; 16];
        bytes[15] = last;
        WorkerId::from_bytes(bytes)
    }

    fn tid(n: u8) -> TaskId {
        let mut bytes = [0u8; 16];
        bytes[0] = n;
        TaskId::from_bytes(bytes)
    }

    #[test]
    fn test_no_idle_worker_means_no_advice() {
        let mut registry = WorkerRegistry::new();
        registry.add_worker(wid(1), HashSet::new(), 8);
        registry.add_worker(wid(2), HashSet::new(), 8);
        registry.assign_task(tid(1), HashSet::new());
        registry.assign_task(tid(2), HashSet::new());
        // Both workers hold one task; nobody is idle.
        assert!(balance(&registry).is_empty());
    }

    #[test]
    fn test_empty_registry_is_degenerate_but_fine() {
        let registry = WorkerRegistry::new();
        assert!(balance(&registry).is_empty());
    }

    #[test]
    fn test_balanced_cluster_with_idle_worker_yields_nothing() {
        let mut registry = WorkerRegistry::new();
        registry.add_worker(wid(1), HashSet::new(), 8);
        registry.add_worker(wid(2), HashSet::new(), 8);
        registry.add_worker(wid(3), HashSet::new(), 8);
        registry.assign_task(tid(1), HashSet::new());
        // avg = 1/3; every worker is within one task of it.
        assert!(balance(&registry).is_empty());
    }
}
