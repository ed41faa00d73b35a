//! Control message payload types.

use phloem_ids::{ObjectId, TaskId, WorkerId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Resource value meaning "required, unmetered".
///
/// Any other value is accepted on the wire but the allocator does not meter
/// it; the token still acts as a hard capability constraint.
pub const UNMETERED: i64 = -1;

/// Task state lifecycle as observed by clients.
///
/// `Pending -> Running -> Success | Failed | Canceled`. A task canceled
/// before it starts never enters `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::Failed | TaskState::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Running => "RUNNING",
            TaskState::Success => "SUCCESS",
            TaskState::Failed => "FAILED",
            TaskState::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(TaskState::Pending),
            "RUNNING" => Ok(TaskState::Running),
            "SUCCESS" => Ok(TaskState::Success),
            "FAILED" => Ok(TaskState::Failed),
            "CANCELED" => Ok(TaskState::Canceled),
            _ => Err(format!("Invalid task state: '{}'", s)),
        }
    }
}

/// Immutable task descriptor submitted by a client.
///
/// The allocator only reads `task_id` and the key set of `resources`; the
/// object ids are opaque references into the object store that workers
/// resolve at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub client_id: Vec<u8>,
    /// Requested resource tokens. See [`UNMETERED`].
    pub resources: BTreeMap<String, i64>,
    pub payload_object_id: ObjectId,
    pub function_object_id: ObjectId,
    pub argument_object_ids: Vec<ObjectId>,
}

impl Task {
    /// The capability tokens this task requires, ignoring resource values.
    pub fn required_capabilities(&self) -> HashSet<String> {
        self.resources.keys().cloned().collect()
    }
}

/// Worker -> Scheduler handshake payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHelloPayload {
    pub worker_id: WorkerId,
    /// Supported resource tokens. Values other than [`UNMETERED`] are
    /// accepted but not metered.
    pub resources: BTreeMap<String, i64>,
    pub queue_size: u32,
}

/// Worker -> Scheduler graceful departure payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerByePayload {
    pub worker_id: WorkerId,
}

/// Worker -> Scheduler and Scheduler -> Client completion payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDonePayload {
    pub task_id: TaskId,
    pub state: TaskState,
    /// Result object for `Success` / `Failed`; absent for `Canceled`.
    pub result_object_id: Option<ObjectId>,
    pub profile: Option<ProfileResult>,
}

/// Scheduler -> Worker eviction payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictTaskPayload {
    pub task_id: TaskId,
    pub from_worker_id: WorkerId,
}

/// Client -> Scheduler cancellation payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTaskPayload {
    pub task_id: TaskId,
}

/// Bidirectional error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Execution profile attached to a completed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileResult {
    pub duration_us: u64,
    pub peak_memory_bytes: u64,
}

/// Failure description stored in the object store for failed tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub message: String,
    pub traceback: Option<String>,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TaskFailure {}

/// Serialize a failure payload for the object store.
pub fn serialize_failure(failure: &TaskFailure) -> Vec<u8> {
    serde_json::to_vec(failure).expect("TaskFailure serialization cannot fail")
}

/// Deserialize a failure payload. Malformed payloads degrade to a failure
/// carrying the raw bytes as the message rather than erroring out of the
/// result path.
pub fn deserialize_failure(payload: &[u8]) -> TaskFailure {
    serde_json::from_slice(payload).unwrap_or_else(|_| TaskFailure {
        message: String::from_utf8_lossy(payload).into_owned(),
        traceback: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_state_terminal() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Success.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Canceled.is_terminal());
    }

    #[test]
    fn test_task_state_wire_format() {
        let json = serde_json::to_string(&TaskState::Success).unwrap();
        assert_eq!(json, "\"SUCCESS\"");
        assert_eq!("failed".parse::<TaskState>().unwrap(), TaskState::Failed);
    }

    #[test]
    fn test_required_capabilities_is_key_set() {
        let task = Task {
            task_id: TaskId::new(),
            client_id: b"client".to_vec(),
            resources: BTreeMap::from([("gpu".to_string(), UNMETERED), ("mem".to_string(), 4)]),
            payload_object_id: ObjectId::new(),
            function_object_id: ObjectId::new(),
            argument_object_ids: vec![ObjectId::new()],
        };

        let required = task.required_capabilities();
        assert_eq!(
            required,
            HashSet::from(["gpu".to_string(), "mem".to_string()])
        );
    }

    #[test]
    fn test_failure_roundtrip_and_fallback() {
        let failure = TaskFailure {
            message: "division by zero".to_string(),
            traceback: Some("at line 3".to_string()),
        };
        assert_eq!(deserialize_failure(&serialize_failure(&failure)), failure);

        let degraded = deserialize_failure(b"plain text error");
        assert_eq!(degraded.message, "plain text error");
        assert!(degraded.traceback.is_none());
    }
}
