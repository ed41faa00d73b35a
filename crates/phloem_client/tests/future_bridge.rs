//! Future/cancellation bridge behavior against mock connectors.

use phloem_client::{ControlChannel, FutureRegistry, ObjectStorage, StoreError, TaskFuture};
use phloem_ids::{ObjectId, TaskId};
use phloem_protocol::{serialize_failure, TaskDonePayload, TaskFailure, TaskState};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// In-memory object store that counts fetches and deletions.
#[derive(Default)]
struct MemoryStore {
    objects: Mutex<HashMap<ObjectId, Vec<u8>>>,
    gets: AtomicUsize,
}

impl MemoryStore {
    fn put(&self, payload: &[u8]) -> ObjectId {
        let object_id = ObjectId::new();
        self.objects
            .lock()
            .unwrap()
            .insert(object_id, payload.to_vec());
        object_id
    }

    fn contains(&self, object_id: ObjectId) -> bool {
        self.objects.lock().unwrap().contains_key(&object_id)
    }

    fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

impl ObjectStorage for MemoryStore {
    fn set_object(&self, object_id: ObjectId, payload: &[u8]) -> Result<(), StoreError> {
        self.objects
            .lock()
            .unwrap()
            .insert(object_id, payload.to_vec());
        Ok(())
    }

    fn get_object(&self, object_id: ObjectId) -> Result<Vec<u8>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap()
            .get(&object_id)
            .cloned()
            .ok_or(StoreError::Rejected {
                request_id: 0,
                message: "object not found".to_string(),
            })
    }

    fn delete_object(&self, object_id: ObjectId) -> Result<bool, StoreError> {
        Ok(self.objects.lock().unwrap().remove(&object_id).is_some())
    }
}

/// Control channel that records cancellation requests.
#[derive(Default)]
struct RecordingChannel {
    cancels: Mutex<Vec<TaskId>>,
}

impl RecordingChannel {
    fn cancel_count(&self) -> usize {
        self.cancels.lock().unwrap().len()
    }
}

impl ControlChannel for RecordingChannel {
    fn send_cancel(&self, task_id: TaskId) -> Result<(), phloem_client::ClientError> {
        self.cancels.lock().unwrap().push(task_id);
        Ok(())
    }
}

fn make_future(
    is_delayed: bool,
    group_task_id: Option<TaskId>,
) -> (TaskFuture, Arc<MemoryStore>, Arc<RecordingChannel>) {
    let store = Arc::new(MemoryStore::default());
    let channel = Arc::new(RecordingChannel::default());
    let future = TaskFuture::new(
        TaskId::new(),
        is_delayed,
        group_task_id,
        channel.clone(),
        store.clone(),
    );
    (future, store, channel)
}

#[test]
fn test_cancel_loses_race_to_completion() {
    let (future, store, channel) = make_future(false, None);
    let object_id = store.put(b"the result");

    let cancel_future = future.clone();
    let canceler =
        thread::spawn(move || cancel_future.cancel(Some(Duration::from_secs(1))).unwrap());

    // Give the canceler time to send the request and block for the answer,
    // then complete the task before any confirmation shows up.
    thread::sleep(Duration::from_millis(50));
    future.set_result_ready(Some(object_id), TaskState::Success, None);

    let was_canceled = canceler.join().unwrap();
    assert!(!was_canceled);
    assert_eq!(channel.cancel_count(), 1);

    assert!(future.done());
    assert!(!future.cancelled());
    assert_eq!(future.result(None).unwrap(), b"the result");

    // A late confirmation must not flip a completed handle.
    future.set_canceled();
    assert!(!future.cancelled());
}

#[test]
fn test_cancel_confirmed_by_scheduler() {
    let (future, _store, channel) = make_future(false, None);

    let cancel_future = future.clone();
    let canceler =
        thread::spawn(move || cancel_future.cancel(Some(Duration::from_secs(1))).unwrap());

    thread::sleep(Duration::from_millis(50));
    future.set_canceled();

    assert!(canceler.join().unwrap());
    assert_eq!(channel.cancel_count(), 1);
    assert!(future.cancelled());
    assert!(matches!(
        future.result(None),
        Err(phloem_client::ClientError::Canceled)
    ));
}

#[test]
fn test_cancel_on_terminal_handle_is_a_noop() {
    let (future, store, channel) = make_future(false, None);
    let object_id = store.put(b"done");
    future.set_result_ready(Some(object_id), TaskState::Success, None);

    // Completed handle: cancel reports failure without an upstream message.
    assert!(!future.cancel(None).unwrap());
    assert_eq!(channel.cancel_count(), 0);

    let (canceled, _store, channel) = make_future(false, None);
    canceled.set_canceled();
    assert!(canceled.cancel(None).unwrap());
    assert_eq!(channel.cancel_count(), 0);
}

#[test]
fn test_delayed_handle_fetches_on_demand() {
    let (future, store, _channel) = make_future(true, None);
    let object_id = store.put(b"lazy payload");

    future.set_result_ready(Some(object_id), TaskState::Success, None);

    // Completion observed, payload untouched.
    assert!(future.done());
    assert_eq!(store.get_count(), 0);
    assert!(store.contains(object_id));

    assert_eq!(future.result(None).unwrap(), b"lazy payload");
    assert_eq!(store.get_count(), 1);

    // Non-graph results are deleted right after the fetch, and the handle
    // never re-observes the payload.
    assert!(!store.contains(object_id));
    assert_eq!(future.result(None).unwrap(), b"lazy payload");
    assert_eq!(store.get_count(), 1);
}

#[test]
fn test_eager_handle_fetches_on_completion() {
    let (future, store, _channel) = make_future(false, None);
    let object_id = store.put(b"eager payload");

    future.set_result_ready(Some(object_id), TaskState::Success, None);
    assert_eq!(store.get_count(), 1);
    assert_eq!(future.result(None).unwrap(), b"eager payload");
}

#[test]
fn test_graph_member_result_is_not_deleted() {
    let group_task_id = Some(TaskId::new());
    let (future, store, _channel) = make_future(true, group_task_id);
    let object_id = store.put(b"graph node output");

    future.set_result_ready(Some(object_id), TaskState::Success, None);
    assert_eq!(future.result(None).unwrap(), b"graph node output");

    // Downstream graph nodes may still need the object.
    assert!(store.contains(object_id));
}

#[test]
fn test_failed_task_surfaces_failure() {
    let (future, store, _channel) = make_future(true, None);
    let failure = TaskFailure {
        message: "division by zero".to_string(),
        traceback: Some("at line 3".to_string()),
    };
    let object_id = store.put(&serialize_failure(&failure));

    future.set_result_ready(Some(object_id), TaskState::Failed, None);

    assert_eq!(future.exception(None).unwrap(), Some(failure.clone()));
    match future.result(None) {
        Err(phloem_client::ClientError::TaskFailed(got)) => assert_eq!(got, failure),
        other => panic!("expected TaskFailed, got {:?}", other),
    }
}

#[test]
fn test_result_timeout_leaves_handle_pending() {
    let (future, store, _channel) = make_future(false, None);

    assert!(matches!(
        future.result(Some(Duration::from_millis(50))),
        Err(phloem_client::ClientError::Timeout)
    ));
    assert!(!future.done());

    // The handle still completes normally afterwards.
    let object_id = store.put(b"late but fine");
    future.set_result_ready(Some(object_id), TaskState::Success, None);
    assert_eq!(future.result(None).unwrap(), b"late but fine");
}

#[test]
fn test_done_callback_forces_fetch_and_fires() {
    let (future, store, _channel) = make_future(true, None);
    let fired = Arc::new(AtomicBool::new(false));

    let flag = fired.clone();
    future
        .add_done_callback(move |f| {
            flag.store(f.done(), Ordering::SeqCst);
        })
        .unwrap();
    assert!(!fired.load(Ordering::SeqCst));

    // A delayed handle with a listener fetches as soon as completion lands.
    let object_id = store.put(b"callback payload");
    future.set_result_ready(Some(object_id), TaskState::Success, None);

    assert!(fired.load(Ordering::SeqCst));
    assert_eq!(store.get_count(), 1);
}

#[test]
fn test_done_callback_on_terminal_handle_fires_immediately() {
    let (future, store, _channel) = make_future(false, None);
    let object_id = store.put(b"already done");
    future.set_result_ready(Some(object_id), TaskState::Success, None);

    let fired = Arc::new(AtomicBool::new(false));
    let flag = fired.clone();
    future
        .add_done_callback(move |_| flag.store(true, Ordering::SeqCst))
        .unwrap();
    assert!(fired.load(Ordering::SeqCst));
}

#[test]
fn test_profiling_info() {
    let (future, store, _channel) = make_future(false, None);
    assert!(matches!(
        future.profiling_info(),
        Err(phloem_client::ClientError::MissingProfilingInfo)
    ));

    let object_id = store.put(b"profiled");
    let profile = phloem_protocol::ProfileResult {
        duration_us: 1234,
        peak_memory_bytes: 1 << 20,
    };
    future.set_result_ready(Some(object_id), TaskState::Success, Some(profile));
    assert_eq!(future.profiling_info().unwrap(), profile);
}

#[test]
fn test_registry_routes_completions() {
    let registry = FutureRegistry::new();
    let (future, store, _channel) = make_future(false, None);
    registry.register(&future);
    assert_eq!(registry.len(), 1);

    let object_id = store.put(b"routed");
    registry.on_task_done(&TaskDonePayload {
        task_id: future.task_id(),
        state: TaskState::Success,
        result_object_id: Some(object_id),
        profile: None,
    });

    assert_eq!(future.result(None).unwrap(), b"routed");
    assert_eq!(registry.len(), 0);
}

#[test]
fn test_registry_drops_dead_handles() {
    let registry = FutureRegistry::new();
    let (future, _store, _channel) = make_future(false, None);
    let task_id = future.task_id();
    registry.register(&future);

    drop(future);
    assert!(registry.is_empty());

    // Messages for dropped handles are ignored, not errors.
    registry.on_cancel_ack(task_id);
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "set_result_ready on a terminal handle")]
fn test_completing_a_terminal_handle_is_a_programming_error() {
    let (future, store, _channel) = make_future(false, None);
    let object_id = store.put(b"first");
    future.set_result_ready(Some(object_id), TaskState::Success, None);

    let second = store.put(b"second");
    future.set_result_ready(Some(second), TaskState::Success, None);
}
