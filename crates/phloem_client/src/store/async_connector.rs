//! Asynchronous object-store connector.
//!
//! Requests register a oneshot completion keyed by request id; `routine`
//! receives one response off the socket and fulfills its completion. There
//! is a single consumer of the socket at a time: whoever drives `routine`.

use super::StoreError;
use phloem_ids::ObjectId;
use phloem_protocol::error::ProtocolError;
use phloem_protocol::{ObjectRequestHeader, ObjectRequestType, ObjectResponseHeader};
use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::warn;
use zeromq::{DealerSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

/// A response completion: header plus payload (empty when none followed).
pub type StoreResponse = (ObjectResponseHeader, Vec<u8>);

pub struct AsyncStoreConnector {
    socket: DealerSocket,
    next_request_id: u64,
    pending: HashMap<u64, oneshot::Sender<StoreResponse>>,
}

impl AsyncStoreConnector {
    pub async fn connect(addr: &str) -> Result<Self, StoreError> {
        let mut socket = DealerSocket::new();
        socket.connect(addr).await?;

        Ok(Self {
            socket,
            next_request_id: 0,
            pending: HashMap::new(),
        })
    }

    /// Send a request and return the receiver its response will arrive on.
    pub async fn begin_request(
        &mut self,
        request_type: ObjectRequestType,
        object_id: ObjectId,
        payload: Option<Vec<u8>>,
    ) -> Result<oneshot::Receiver<StoreResponse>, StoreError> {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);

        let payload_len = payload.as_ref().map_or(0, |p| p.len() as u64);
        let header = ObjectRequestHeader::new(request_type, request_id, object_id, payload_len);

        let mut multipart = ZmqMessage::from(header.pack()?.to_vec());
        if let Some(payload) = payload {
            multipart.push_back(payload.into());
        }
        self.socket.send(multipart).await?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);
        Ok(rx)
    }

    /// Receive one response and fulfill its completion.
    pub async fn routine(&mut self) -> Result<(), StoreError> {
        let multipart = self.socket.recv().await?;
        let frames: Vec<Vec<u8>> = multipart
            .into_vec()
            .into_iter()
            .map(|bytes| bytes.to_vec())
            .collect();

        if frames.is_empty() {
            return Err(StoreError::Protocol(ProtocolError::InvalidFrameCount {
                expected: 1,
                got: 0,
            }));
        }

        let header = ObjectResponseHeader::unpack(&frames[0])?;
        let payload = frames.get(1).cloned().unwrap_or_default();
        if payload.len() as u64 != header.payload_len {
            return Err(StoreError::Protocol(ProtocolError::PayloadLengthMismatch {
                expected: header.payload_len as usize,
                got: payload.len(),
            }));
        }

        match self.pending.remove(&header.request_id) {
            Some(tx) => {
                // A dropped receiver means the batch gave up; nothing to do.
                let _ = tx.send((header, payload));
            }
            None => {
                warn!(
                    request_id = header.request_id,
                    "Response for unknown request, dropping"
                );
            }
        }

        Ok(())
    }

    /// Requests sent but not yet answered.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }
}
