//! Client-side task handles.
//!
//! A [`TaskFuture`] tracks one submitted task. Unlike an ordinary promise,
//! cancellation is a round-trip: `cancel` sends the request upstream and
//! blocks until the scheduler confirms it or the task's completion wins the
//! race, in which case the real result is delivered and `cancel` reports
//! failure.
//!
//! Result payloads live in the object store. A delayed handle leaves its
//! payload there until someone actually looks (`result`, `exception`, or a
//! completion callback being attached); an eager handle fetches as soon as
//! the completion arrives. Threads blocked in `result`/`exception` fetch
//! for themselves right after waking. Results that are not part of a task
//! graph are deleted from the store immediately after the fetch; graph
//! members stay, since downstream nodes may still read them.

use crate::error::ClientError;
use crate::store::ObjectStorage;
use phloem_ids::{ObjectId, TaskId};
use phloem_protocol::{deserialize_failure, ProfileResult, TaskFailure, TaskState};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Upstream channel a handle uses to request cancellation.
pub trait ControlChannel: Send + Sync {
    fn send_cancel(&self, task_id: TaskId) -> Result<(), ClientError>;
}

type DoneCallback = Box<dyn FnOnce(&TaskFuture) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FuturePhase {
    /// No completion observed yet.
    Pending,
    /// Completion observed, result payload not yet materialized.
    Ready,
    /// Result payload observed (a value or a failure).
    Done,
    /// Cancellation confirmed before completion.
    Canceled,
}

struct FutureSlot {
    phase: FuturePhase,
    result_object_id: Option<ObjectId>,
    completed_state: Option<TaskState>,
    outcome: Option<Result<Vec<u8>, TaskFailure>>,
    cancel_requested: bool,
    profiling: Option<ProfileResult>,
    callbacks: Vec<DoneCallback>,
}

pub(crate) struct FutureShared {
    task_id: TaskId,
    is_delayed: bool,
    group_task_id: Option<TaskId>,
    control: Arc<dyn ControlChannel>,
    store: Arc<dyn ObjectStorage>,
    slot: Mutex<FutureSlot>,
    cond: Condvar,
}

/// Handle to a submitted task's eventual outcome.
#[derive(Clone)]
pub struct TaskFuture {
    shared: Arc<FutureShared>,
}

impl TaskFuture {
    pub fn new(
        task_id: TaskId,
        is_delayed: bool,
        group_task_id: Option<TaskId>,
        control: Arc<dyn ControlChannel>,
        store: Arc<dyn ObjectStorage>,
    ) -> Self {
        Self {
            shared: Arc::new(FutureShared {
                task_id,
                is_delayed,
                group_task_id,
                control,
                store,
                slot: Mutex::new(FutureSlot {
                    phase: FuturePhase::Pending,
                    result_object_id: None,
                    completed_state: None,
                    outcome: None,
                    cancel_requested: false,
                    profiling: None,
                    callbacks: Vec::new(),
                }),
                cond: Condvar::new(),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<FutureShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<FutureShared> {
        &self.shared
    }

    pub fn task_id(&self) -> TaskId {
        self.shared.task_id
    }

    /// True once a completion or a cancellation has been observed, whether
    /// or not the result payload was fetched yet.
    pub fn done(&self) -> bool {
        self.lock().phase != FuturePhase::Pending
    }

    pub fn cancelled(&self) -> bool {
        self.lock().phase == FuturePhase::Canceled
    }

    pub fn profiling_info(&self) -> Result<ProfileResult, ClientError> {
        self.lock()
            .profiling
            .ok_or(ClientError::MissingProfilingInfo)
    }

    /// Block until the task completes and return its result payload.
    pub fn result(&self, timeout: Option<Duration>) -> Result<Vec<u8>, ClientError> {
        let slot = self.lock();
        let mut slot = self.wait_ready(slot, timeout)?;
        if slot.phase == FuturePhase::Canceled {
            return Err(ClientError::Canceled);
        }

        let callbacks = self.materialize(&mut slot)?;
        let outcome = slot.outcome.clone();
        drop(slot);
        self.run_callbacks(callbacks);

        match outcome {
            Some(Ok(payload)) => Ok(payload),
            Some(Err(failure)) => Err(ClientError::TaskFailed(failure)),
            None => Err(ClientError::UnexpectedTaskState(TaskState::Pending)),
        }
    }

    /// Block until the task completes and return its failure, if any.
    pub fn exception(&self, timeout: Option<Duration>) -> Result<Option<TaskFailure>, ClientError> {
        let slot = self.lock();
        let mut slot = self.wait_ready(slot, timeout)?;
        if slot.phase == FuturePhase::Canceled {
            return Err(ClientError::Canceled);
        }

        let callbacks = self.materialize(&mut slot)?;
        let outcome = slot.outcome.clone();
        drop(slot);
        self.run_callbacks(callbacks);

        match outcome {
            Some(Err(failure)) => Ok(Some(failure)),
            _ => Ok(None),
        }
    }

    /// Request cancellation and block for the scheduler's answer: either a
    /// cancellation confirmation or the completion that raced past it.
    /// Returns whether the task ended up canceled. Terminal handles
    /// short-circuit without another round-trip.
    pub fn cancel(&self, timeout: Option<Duration>) -> Result<bool, ClientError> {
        let mut slot = self.lock();
        match slot.phase {
            FuturePhase::Canceled => return Ok(true),
            FuturePhase::Ready | FuturePhase::Done => return Ok(false),
            FuturePhase::Pending => {}
        }

        if !slot.cancel_requested {
            self.shared.control.send_cancel(self.shared.task_id)?;
            slot.cancel_requested = true;
        }

        let slot = self.wait_ready(slot, timeout)?;
        Ok(slot.phase == FuturePhase::Canceled)
    }

    /// Attach a completion callback. Fires immediately when the handle is
    /// already terminal; attaching to a delayed handle whose completion has
    /// arrived forces the result fetch.
    pub fn add_done_callback(
        &self,
        callback: impl FnOnce(&TaskFuture) + Send + 'static,
    ) -> Result<(), ClientError> {
        let mut slot = self.lock();

        let mut pending_callbacks = Vec::new();
        if slot.phase == FuturePhase::Ready {
            pending_callbacks = self.materialize(&mut slot)?;
        }

        if slot.phase == FuturePhase::Done || slot.phase == FuturePhase::Canceled {
            drop(slot);
            self.run_callbacks(pending_callbacks);
            callback(self);
        } else {
            slot.callbacks.push(Box::new(callback));
        }
        Ok(())
    }

    /// Completion observed: record it and, for eager handles or handles
    /// with listeners, fetch the result payload right away. Called by the
    /// future registry when the scheduler reports the task done.
    pub fn set_result_ready(
        &self,
        object_id: Option<ObjectId>,
        state: TaskState,
        profiling: Option<ProfileResult>,
    ) {
        let mut slot = self.lock();
        if slot.phase != FuturePhase::Pending {
            debug_assert!(
                false,
                "set_result_ready on a terminal handle for task {}",
                self.shared.task_id
            );
            error!(task = %self.shared.task_id, "Ignoring completion for terminal handle");
            return;
        }

        slot.phase = FuturePhase::Ready;
        slot.result_object_id = object_id;
        slot.completed_state = Some(state);
        if profiling.is_some() {
            slot.profiling = profiling;
        }

        let mut callbacks = Vec::new();
        if !self.shared.is_delayed || !slot.callbacks.is_empty() {
            match self.materialize(&mut slot) {
                Ok(drained) => callbacks = drained,
                Err(e) => {
                    // Leave the handle Ready; a later result() retries the
                    // fetch and surfaces the store failure to the caller.
                    warn!(task = %self.shared.task_id, "Failed to fetch result: {}", e);
                }
            }
        }

        self.shared.cond.notify_all();
        drop(slot);
        self.run_callbacks(callbacks);
    }

    /// Cancellation confirmed by the scheduler. A completion that already
    /// arrived wins the race and the confirmation is ignored.
    pub fn set_canceled(&self) {
        let mut slot = self.lock();
        match slot.phase {
            FuturePhase::Ready | FuturePhase::Done => {
                debug!(task = %self.shared.task_id, "Cancel lost the race to completion");
                return;
            }
            FuturePhase::Canceled => return,
            FuturePhase::Pending => {}
        }

        slot.phase = FuturePhase::Canceled;
        slot.cancel_requested = true;
        let callbacks = std::mem::take(&mut slot.callbacks);

        self.shared.cond.notify_all();
        drop(slot);
        self.run_callbacks(callbacks);
    }

    /// Fetch and decode the result payload if it has not been observed yet.
    /// Returns the callbacks to invoke once the lock is released.
    fn materialize(
        &self,
        slot: &mut MutexGuard<'_, FutureSlot>,
    ) -> Result<Vec<DoneCallback>, ClientError> {
        if slot.phase != FuturePhase::Ready {
            return Ok(Vec::new());
        }

        let state = slot.completed_state.unwrap_or(TaskState::Pending);
        let payload = match slot.result_object_id {
            Some(object_id) => {
                let payload = self.shared.store.get_object(object_id)?;
                if self.shared.group_task_id.is_none() {
                    // Non-graph results have a single consumer; reclaim the
                    // store slot eagerly. Graph members may still be read by
                    // downstream nodes.
                    if let Err(e) = self.shared.store.delete_object(object_id) {
                        warn!(task = %self.shared.task_id, "Failed to delete result object: {}", e);
                    }
                }
                payload
            }
            None => Vec::new(),
        };

        match state {
            TaskState::Success => slot.outcome = Some(Ok(payload)),
            TaskState::Failed => slot.outcome = Some(Err(deserialize_failure(&payload))),
            other => return Err(ClientError::UnexpectedTaskState(other)),
        }

        slot.phase = FuturePhase::Done;
        Ok(std::mem::take(&mut slot.callbacks))
    }

    fn wait_ready<'a>(
        &'a self,
        mut slot: MutexGuard<'a, FutureSlot>,
        timeout: Option<Duration>,
    ) -> Result<MutexGuard<'a, FutureSlot>, ClientError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        while slot.phase == FuturePhase::Pending {
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ClientError::Timeout);
                    }
                    let (guard, wait_result) = self
                        .shared
                        .cond
                        .wait_timeout(slot, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    slot = guard;
                    // A spurious wake re-checks the phase on the next loop
                    // iteration; only a true timeout with no completion
                    // raises.
                    if wait_result.timed_out() && slot.phase == FuturePhase::Pending {
                        return Err(ClientError::Timeout);
                    }
                }
                None => {
                    slot = self
                        .shared
                        .cond
                        .wait(slot)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }

        Ok(slot)
    }

    fn run_callbacks(&self, callbacks: Vec<DoneCallback>) {
        for callback in callbacks {
            callback(self);
        }
    }

    fn lock(&self) -> MutexGuard<'_, FutureSlot> {
        self.shared
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
