//! Allocation policies.
//!
//! Both policies share the operation vocabulary the dispatcher consumes;
//! they differ only in how workers declare what they can run. The even-load
//! policy takes a plain capability set and never looks at resource values;
//! the resource-aware policy takes a resource mapping and degrades its
//! values to binary capabilities, warning when a value is metered.

mod even_load;
mod resource;

pub use even_load::EvenLoadPolicy;
pub use resource::ResourcePolicy;

use crate::registry::WorkerStatistics;
use phloem_ids::{TaskId, WorkerId};
use phloem_protocol::Task;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Which allocation policy the scheduler runs. Chosen at startup; there is
/// no runtime switching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Even,
    Resources,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Even => "even",
            PolicyKind::Resources => "resources",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "even" => Ok(PolicyKind::Even),
            "resources" => Ok(PolicyKind::Resources),
            _ => Err(format!(
                "Invalid allocation policy: '{}'. Expected: even or resources",
                s
            )),
        }
    }
}

/// Tagged policy variant. The dispatcher drives it through the shared
/// vocabulary below without caring which policy is active.
#[derive(Debug)]
pub enum AllocatePolicy {
    EvenLoad(EvenLoadPolicy),
    Resources(ResourcePolicy),
}

impl AllocatePolicy {
    pub fn new(kind: PolicyKind) -> Self {
        match kind {
            PolicyKind::Even => AllocatePolicy::EvenLoad(EvenLoadPolicy::new()),
            PolicyKind::Resources => AllocatePolicy::Resources(ResourcePolicy::new()),
        }
    }

    /// Register a worker from its wire-level resource declaration.
    pub fn add_worker(
        &mut self,
        worker_id: WorkerId,
        resources: &BTreeMap<String, i64>,
        queue_size: u32,
    ) -> bool {
        match self {
            AllocatePolicy::EvenLoad(policy) => {
                policy.add_worker(worker_id, resources.keys().cloned().collect(), queue_size)
            }
            AllocatePolicy::Resources(policy) => policy.add_worker(worker_id, resources, queue_size),
        }
    }

    pub fn remove_worker(&mut self, worker_id: WorkerId) -> Vec<TaskId> {
        match self {
            AllocatePolicy::EvenLoad(policy) => policy.remove_worker(worker_id),
            AllocatePolicy::Resources(policy) => policy.remove_worker(worker_id),
        }
    }

    pub fn worker_ids(&self) -> HashSet<WorkerId> {
        match self {
            AllocatePolicy::EvenLoad(policy) => policy.worker_ids(),
            AllocatePolicy::Resources(policy) => policy.worker_ids(),
        }
    }

    pub fn worker_by_task_id(&self, task_id: TaskId) -> WorkerId {
        match self {
            AllocatePolicy::EvenLoad(policy) => policy.worker_by_task_id(task_id),
            AllocatePolicy::Resources(policy) => policy.worker_by_task_id(task_id),
        }
    }

    pub fn assign_task(&mut self, task: &Task) -> WorkerId {
        match self {
            AllocatePolicy::EvenLoad(policy) => policy.assign_task(task),
            AllocatePolicy::Resources(policy) => policy.assign_task(task),
        }
    }

    pub fn remove_task(&mut self, task_id: TaskId) -> WorkerId {
        match self {
            AllocatePolicy::EvenLoad(policy) => policy.remove_task(task_id),
            AllocatePolicy::Resources(policy) => policy.remove_task(task_id),
        }
    }

    pub fn has_available_worker(&self, required: &HashSet<String>) -> bool {
        match self {
            AllocatePolicy::EvenLoad(policy) => policy.has_available_worker(required),
            AllocatePolicy::Resources(policy) => policy.has_available_worker(required),
        }
    }

    pub fn balance(&self) -> HashMap<WorkerId, Vec<TaskId>> {
        match self {
            AllocatePolicy::EvenLoad(policy) => policy.balance(),
            AllocatePolicy::Resources(policy) => policy.balance(),
        }
    }

    pub fn statistics(&self) -> HashMap<WorkerId, WorkerStatistics> {
        match self {
            AllocatePolicy::EvenLoad(policy) => policy.statistics(),
            AllocatePolicy::Resources(policy) => policy.statistics(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_kind_parsing() {
        assert_eq!("even".parse::<PolicyKind>().unwrap(), PolicyKind::Even);
        assert_eq!(
            "Resources".parse::<PolicyKind>().unwrap(),
            PolicyKind::Resources
        );
        assert!("fair-share".parse::<PolicyKind>().is_err());
    }

    #[test]
    fn test_policy_kind_display_roundtrip() {
        for kind in [PolicyKind::Even, PolicyKind::Resources] {
            assert_eq!(kind.to_string().parse::<PolicyKind>().unwrap(), kind);
        }
    }
}
