//! Client-side connector to the scheduler.
//!
//! A DEALER socket shared across client threads behind a mutex. Submission
//! and cancellation go out through it; `poll` pumps one scheduler message
//! back into the future registry.

use crate::error::ClientError;
use crate::future::ControlChannel;
use crate::registry::FutureRegistry;
use phloem_ids::TaskId;
use phloem_protocol::{CancelTaskPayload, Message, OpCode, Task};
use std::sync::{Mutex, PoisonError};

/// Socket receive timeout for `poll`.
const RECV_TIMEOUT_MS: i32 = 100;

pub struct SchedulerChannel {
    #[allow(dead_code)]
    context: zmq::Context,
    socket: Mutex<zmq::Socket>,
}

impl SchedulerChannel {
    pub fn connect(addr: &str) -> Result<Self, ClientError> {
        let context = zmq::Context::new();
        let socket = context.socket(zmq::DEALER)?;
        socket.connect(addr)?;
        socket.set_rcvtimeo(RECV_TIMEOUT_MS)?;

        Ok(Self {
            context,
            socket: Mutex::new(socket),
        })
    }

    /// Submit a task for execution.
    pub fn submit(&self, task: &Task) -> Result<(), ClientError> {
        let payload = serde_json::to_vec(task).map_err(phloem_protocol::error::ProtocolError::from)?;
        self.send(OpCode::SubmitTask, task.task_id, payload)
    }

    /// Receive one scheduler message and route it to the registry.
    /// Returns false when the receive timed out with nothing to route.
    pub fn poll(&self, registry: &FutureRegistry) -> Result<bool, ClientError> {
        let frames = {
            let socket = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
            match socket.recv_multipart(0) {
                Ok(frames) => frames,
                Err(zmq::Error::EAGAIN) => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        };

        let msg = Message::unpack(&frames)?;
        registry.route_message(&msg)?;
        Ok(true)
    }

    fn send(&self, opcode: OpCode, task_id: TaskId, payload: Vec<u8>) -> Result<(), ClientError> {
        let msg = Message::new(opcode, task_id, payload)?;
        let (header, payload) = msg.pack()?;

        let socket = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
        socket.send_multipart([header, payload], 0)?;
        Ok(())
    }
}

impl ControlChannel for SchedulerChannel {
    fn send_cancel(&self, task_id: TaskId) -> Result<(), ClientError> {
        let payload = CancelTaskPayload { task_id };
        let payload = serde_json::to_vec(&payload).map_err(phloem_protocol::error::ProtocolError::from)?;
        self.send(OpCode::CancelTask, task_id, payload)
    }
}
