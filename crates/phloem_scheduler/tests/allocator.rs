//! Allocation policy behavior against the dispatcher-facing contract.

use phloem_ids::{ObjectId, TaskId, WorkerId};
use phloem_protocol::types::UNMETERED;
use phloem_protocol::Task;
use phloem_scheduler::{EvenLoadPolicy, ResourcePolicy};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

const QUEUE_SIZE: u32 = 5;

fn wid(label: &str) -> WorkerId {
    let mut bytes = [0u8; 16];
    for (i, b) in label.bytes().take(16).enumerate() {
        bytes[i] = b;
    }
    WorkerId::from_bytes(bytes)
}

fn caps(tokens: &[&str]) -> HashSet<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}

fn task(label: &str, tags: &[&str]) -> Task {
    let mut bytes = [0u8; 16];
    for (i, b) in label.bytes().take(16).enumerate() {
        bytes[i] = b;
    }
    Task {
        task_id: TaskId::from_bytes(bytes),
        client_id: b"client_id".to_vec(),
        resources: tags.iter().map(|t| (t.to_string(), UNMETERED)).collect(),
        payload_object_id: ObjectId::new(),
        function_object_id: ObjectId::new(),
        argument_object_ids: Vec::new(),
    }
}

#[test]
fn test_assign_task() {
    let mut allocator = EvenLoadPolicy::new();

    let regular_task = task("task_regular", &[]);

    // No worker, should return the invalid sentinel
    let assigned_worker = allocator.assign_task(&regular_task);
    assert!(!assigned_worker.is_valid());

    // Adds a bunch of workers
    assert!(allocator.add_worker(wid("worker_regular"), caps(&[]), QUEUE_SIZE));
    assert!(allocator.add_worker(wid("worker_gpu"), caps(&["gpu"]), QUEUE_SIZE));

    assert_eq!(
        allocator.worker_ids(),
        HashSet::from([wid("worker_regular"), wid("worker_gpu")])
    );

    // Assign a task to the GPU worker
    let gpu_task = task("task_gpu", &["gpu"]);
    assert_eq!(allocator.assign_task(&gpu_task), wid("worker_gpu"));

    // Assign a task with an unsupported tag should fail
    let mac_os_task = task("task_mac_os", &["mac_os"]);
    assert!(!allocator.assign_task(&mac_os_task).is_valid());

    // Assign a task without tag goes to the least-loaded capable worker
    assert_eq!(allocator.assign_task(&regular_task), wid("worker_regular"));

    // Assign should fail once every queue slot is taken
    for i in 0..(QUEUE_SIZE as usize * 2) - 2 {
        assert!(allocator.has_available_worker(&caps(&[])));

        let filler = task(&format!("task_{}", i), &[]);
        assert!(allocator.assign_task(&filler).is_valid());
    }

    assert!(!allocator.has_available_worker(&caps(&[])));

    let overloaded_task = task("task_overload", &[]);
    assert!(!allocator.assign_task(&overloaded_task).is_valid());
}

#[test]
fn test_single_worker_capacity() {
    let mut allocator = EvenLoadPolicy::new();
    allocator.add_worker(wid("worker_1"), caps(&[]), QUEUE_SIZE);

    for i in 0..QUEUE_SIZE as usize {
        let assigned = allocator.assign_task(&task(&format!("task_{}", i), &[]));
        assert_eq!(assigned, wid("worker_1"));
    }

    // The sixth task does not fit
    assert!(!allocator.assign_task(&task("task_5", &[])).is_valid());

    let stats = allocator.statistics();
    assert_eq!(stats[&wid("worker_1")].free, 0);
    assert_eq!(stats[&wid("worker_1")].sent, QUEUE_SIZE);
}

#[test]
fn test_remove_worker() {
    const N_TASKS: usize = QUEUE_SIZE as usize + 3;

    let mut allocator = EvenLoadPolicy::new();

    allocator.add_worker(wid("worker_1"), caps(&[]), QUEUE_SIZE);
    allocator.add_worker(wid("worker_2"), caps(&[]), QUEUE_SIZE);

    // Adds a bunch of tasks

    let mut worker_id_to_tasks: HashMap<WorkerId, HashSet<TaskId>> = HashMap::from([
        (wid("worker_1"), HashSet::new()),
        (wid("worker_2"), HashSet::new()),
    ]);

    for i in 0..N_TASKS {
        let submitted = task(&format!("task_{}", i), &[]);
        let assigned_worker = allocator.assign_task(&submitted);
        assert!(assigned_worker.is_valid());
        worker_id_to_tasks
            .get_mut(&assigned_worker)
            .unwrap()
            .insert(submitted.task_id);
    }

    // Tasks should be balanced between the two workers
    for worker_tasks in worker_id_to_tasks.values() {
        assert_eq!(worker_tasks.len(), N_TASKS / 2);
    }

    // Removing a worker returns exactly its queued task ids, and those tasks
    // are no longer assigned anywhere.
    for worker in [wid("worker_1"), wid("worker_2")] {
        let returned = allocator.remove_worker(worker);
        let returned: HashSet<TaskId> = returned.into_iter().collect();
        assert_eq!(returned, worker_id_to_tasks[&worker]);

        for task_id in &returned {
            assert!(!allocator.worker_by_task_id(*task_id).is_valid());
        }
    }

    // Removing an unknown worker is a silent no-op
    assert!(allocator.remove_worker(wid("worker_1")).is_empty());
}

#[test]
fn test_resource_policy_shares_the_contract() {
    let mut allocator = ResourcePolicy::new();

    // Metered values are accepted (with a warning) but only the key set acts
    // as a constraint.
    let resources = BTreeMap::from([("gpu".to_string(), 2i64)]);
    assert!(allocator.add_worker(wid("worker_gpu"), &resources, QUEUE_SIZE));
    assert!(!allocator.add_worker(wid("worker_gpu"), &resources, QUEUE_SIZE));

    let mut gpu_task = task("task_gpu", &["gpu"]);
    gpu_task.resources.insert("gpu".to_string(), 4);
    assert_eq!(allocator.assign_task(&gpu_task), wid("worker_gpu"));

    // A task asking for a token nobody claims still fails
    assert!(!allocator.assign_task(&task("task_tpu", &["tpu"])).is_valid());

    let stats = allocator.statistics();
    assert_eq!(stats[&wid("worker_gpu")].sent, 1);
    assert_eq!(
        stats[&wid("worker_gpu")].capabilities,
        BTreeSet::from(["gpu".to_string()])
    );

    // remove_task hands back the previous assignee
    assert_eq!(allocator.remove_task(gpu_task.task_id), wid("worker_gpu"));
    assert!(!allocator.remove_task(gpu_task.task_id).is_valid());
}
