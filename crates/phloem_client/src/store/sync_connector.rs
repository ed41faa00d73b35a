//! Synchronous object-store connector.
//!
//! One request/response exchange per call, serialized by an internal mutex
//! so the connector can be shared across client threads.

use super::{ensure_empty_payload, ensure_response_type, ObjectStorage, StoreError};
use phloem_ids::ObjectId;
use phloem_protocol::error::ProtocolError;
use phloem_protocol::{
    ObjectRequestHeader, ObjectRequestType, ObjectResponseHeader, ObjectResponseType,
};
use std::sync::{Mutex, PoisonError};

pub struct SyncStoreConnector {
    #[allow(dead_code)]
    context: zmq::Context,
    inner: Mutex<SyncInner>,
}

struct SyncInner {
    socket: zmq::Socket,
    next_request_id: u64,
    closed: bool,
}

impl SyncStoreConnector {
    pub fn connect(addr: &str) -> Result<Self, StoreError> {
        let context = zmq::Context::new();
        let socket = context.socket(zmq::DEALER)?;
        socket.connect(addr)?;

        Ok(Self {
            context,
            inner: Mutex::new(SyncInner {
                socket,
                next_request_id: 0,
                closed: false,
            }),
        })
    }

    /// Close the connector. Subsequent calls fail with [`StoreError::Closed`].
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.closed = true;
    }

    fn exchange(
        &self,
        request_type: ObjectRequestType,
        object_id: ObjectId,
        payload: Option<&[u8]>,
    ) -> Result<(ObjectResponseHeader, Vec<u8>), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.closed {
            return Err(StoreError::Closed);
        }

        let request_id = inner.next_request_id;
        inner.next_request_id = inner.next_request_id.wrapping_add(1);

        let payload_len = payload.map_or(0, |p| p.len() as u64);
        let header = ObjectRequestHeader::new(request_type, request_id, object_id, payload_len);
        let header_bytes = header.pack()?.to_vec();

        match payload {
            Some(payload) => inner
                .socket
                .send_multipart([header_bytes, payload.to_vec()], 0)?,
            None => inner.socket.send_multipart([header_bytes], 0)?,
        }

        let frames = inner.socket.recv_multipart(0)?;
        if frames.is_empty() {
            return Err(StoreError::Protocol(ProtocolError::InvalidFrameCount {
                expected: 1,
                got: 0,
            }));
        }

        let response_header = ObjectResponseHeader::unpack(&frames[0])?;
        let response_payload = frames.get(1).cloned().unwrap_or_default();
        if response_payload.len() as u64 != response_header.payload_len {
            return Err(StoreError::Protocol(ProtocolError::PayloadLengthMismatch {
                expected: response_header.payload_len as usize,
                got: response_payload.len(),
            }));
        }

        Ok((response_header, response_payload))
    }
}

impl ObjectStorage for SyncStoreConnector {
    fn set_object(&self, object_id: ObjectId, payload: &[u8]) -> Result<(), StoreError> {
        let (header, response_payload) =
            self.exchange(ObjectRequestType::SetObject, object_id, Some(payload))?;
        ensure_response_type(&header, &response_payload, &[ObjectResponseType::SetOk])?;
        ensure_empty_payload(&response_payload)
    }

    fn get_object(&self, object_id: ObjectId) -> Result<Vec<u8>, StoreError> {
        let (header, response_payload) =
            self.exchange(ObjectRequestType::GetObject, object_id, None)?;
        ensure_response_type(&header, &response_payload, &[ObjectResponseType::GetOk])?;
        Ok(response_payload)
    }

    fn delete_object(&self, object_id: ObjectId) -> Result<bool, StoreError> {
        let (header, response_payload) =
            self.exchange(ObjectRequestType::DeleteObject, object_id, None)?;
        ensure_response_type(
            &header,
            &response_payload,
            &[ObjectResponseType::DelOk, ObjectResponseType::DelNotExists],
        )?;
        ensure_empty_payload(&response_payload)?;

        Ok(header.response_type == ObjectResponseType::DelOk)
    }
}
