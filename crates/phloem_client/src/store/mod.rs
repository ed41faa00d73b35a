//! Client-side object-store connectors.
//!
//! The object store holds task payloads, function bodies, arguments and
//! results, addressed by [`ObjectId`]. Three connectors cover the access
//! patterns the client needs: a mutex-serialized synchronous connector for
//! per-object calls from any thread, an asynchronous connector for event
//! loops, and a batched connector that drives the asynchronous one to
//! completion under a single lock for multi-object operations.

pub mod async_connector;
pub mod batch;
pub mod sync_connector;

pub use async_connector::AsyncStoreConnector;
pub use batch::BatchStoreConnector;
pub use sync_connector::SyncStoreConnector;

use phloem_ids::ObjectId;
use phloem_protocol::{ObjectResponseHeader, ObjectResponseType};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connector is closed")]
    Closed,

    #[error("store rejected request {request_id}: {message}")]
    Rejected { request_id: u64, message: String },

    #[error("unexpected response type {got:?} for request {request_id}")]
    UnexpectedResponse {
        request_id: u64,
        got: ObjectResponseType,
    },

    #[error("unexpected response payload of {0} bytes, expected empty")]
    UnexpectedPayload(usize),

    #[error("response completion dropped before being fulfilled")]
    CompletionDropped,

    #[error("protocol error: {0}")]
    Protocol(#[from] phloem_protocol::error::ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] zmq::Error),

    #[error("transport error: {0}")]
    AsyncTransport(#[from] zeromq::ZmqError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Synchronous object-store access, shareable across threads.
pub trait ObjectStorage: Send + Sync {
    /// Store an object's payload under `object_id`.
    fn set_object(&self, object_id: ObjectId, payload: &[u8]) -> Result<(), StoreError>;

    /// Fetch an object's payload. Blocks until the object is available.
    fn get_object(&self, object_id: ObjectId) -> Result<Vec<u8>, StoreError>;

    /// Remove an object. Returns false when the store did not hold it.
    fn delete_object(&self, object_id: ObjectId) -> Result<bool, StoreError>;
}

pub(crate) fn ensure_response_type(
    header: &ObjectResponseHeader,
    payload: &[u8],
    valid: &[ObjectResponseType],
) -> Result<(), StoreError> {
    if header.response_type == ObjectResponseType::Error {
        return Err(StoreError::Rejected {
            request_id: header.request_id,
            message: String::from_utf8_lossy(payload).into_owned(),
        });
    }
    if !valid.contains(&header.response_type) {
        return Err(StoreError::UnexpectedResponse {
            request_id: header.request_id,
            got: header.response_type,
        });
    }
    Ok(())
}

pub(crate) fn ensure_empty_payload(payload: &[u8]) -> Result<(), StoreError> {
    if !payload.is_empty() {
        return Err(StoreError::UnexpectedPayload(payload.len()));
    }
    Ok(())
}
