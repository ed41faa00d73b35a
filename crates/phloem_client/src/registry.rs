//! Routing of scheduler messages to live task handles.
//!
//! The registry holds weak references only: the client owns the strong
//! handle, so dropping the last [`TaskFuture`] lets the handle die even if
//! the registry never hears about the task again.

use crate::future::{FutureShared, TaskFuture};
use phloem_ids::TaskId;
use phloem_protocol::error::ProtocolError;
use phloem_protocol::{Message, OpCode, TaskDonePayload};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, Weak};
use tracing::debug;

#[derive(Default)]
pub struct FutureRegistry {
    futures: Mutex<HashMap<TaskId, Weak<FutureShared>>>,
}

impl FutureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a handle so completion messages can reach it.
    pub fn register(&self, future: &TaskFuture) {
        let mut futures = self.lock();
        futures.retain(|_, weak| weak.strong_count() > 0);
        futures.insert(future.task_id(), std::sync::Arc::downgrade(future.shared()));
    }

    /// Number of live tracked handles.
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Route one scheduler message to the handle it addresses.
    pub fn route_message(&self, msg: &Message) -> Result<(), ProtocolError> {
        match msg.header.opcode {
            OpCode::TaskDone => {
                let payload: TaskDonePayload = serde_json::from_slice(&msg.payload)?;
                self.on_task_done(&payload);
            }
            OpCode::CancelAck => {
                self.on_cancel_ack(msg.header.task_id);
            }
            other => {
                debug!("Ignoring scheduler message with opcode {:?}", other);
            }
        }
        Ok(())
    }

    pub fn on_task_done(&self, payload: &TaskDonePayload) {
        if let Some(future) = self.take(payload.task_id) {
            future.set_result_ready(payload.result_object_id, payload.state, payload.profile);
        } else {
            debug!(task = %payload.task_id, "Completion for unknown or dropped handle");
        }
    }

    pub fn on_cancel_ack(&self, task_id: TaskId) {
        if let Some(future) = self.take(task_id) {
            future.set_canceled();
        } else {
            debug!(task = %task_id, "Cancel confirmation for unknown or dropped handle");
        }
    }

    fn take(&self, task_id: TaskId) -> Option<TaskFuture> {
        self.lock()
            .remove(&task_id)?
            .upgrade()
            .map(TaskFuture::from_shared)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, Weak<FutureShared>>> {
        self.futures.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
