//! Client-facing error types.

use crate::store::StoreError;
use phloem_protocol::{TaskFailure, TaskState};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("operation timed out")]
    Timeout,

    #[error("task was canceled")]
    Canceled,

    #[error("task failed: {0}")]
    TaskFailed(TaskFailure),

    #[error("object store failure: {0}")]
    Store(#[from] StoreError),

    #[error("unexpected task state: {0}")]
    UnexpectedTaskState(TaskState),

    #[error("profiling info not received yet")]
    MissingProfilingInfo,

    #[error("protocol error: {0}")]
    Protocol(#[from] phloem_protocol::error::ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] zmq::Error),
}
