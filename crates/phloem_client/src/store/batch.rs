//! Batched object-store connector.
//!
//! Multi-object operations acquire the batch lock once, then drive the
//! asynchronous connector on a private current-thread runtime: send every
//! request, run the receive routine once per request, and collect the
//! completions in request order. No other request can interleave with a
//! batch. Single-object calls delegate to an owned synchronous connector.

use super::async_connector::AsyncStoreConnector;
use super::sync_connector::SyncStoreConnector;
use super::{ensure_empty_payload, ensure_response_type, ObjectStorage, StoreError};
use phloem_ids::ObjectId;
use phloem_protocol::{ObjectRequestType, ObjectResponseType};
use std::sync::{Mutex, PoisonError};

pub struct BatchStoreConnector {
    sync: SyncStoreConnector,
    batch: Mutex<BatchInner>,
}

struct BatchInner {
    runtime: tokio::runtime::Runtime,
    connector: AsyncStoreConnector,
}

impl BatchStoreConnector {
    pub fn connect(addr: &str) -> Result<Self, StoreError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let connector = runtime.block_on(AsyncStoreConnector::connect(addr))?;

        Ok(Self {
            sync: SyncStoreConnector::connect(addr)?,
            batch: Mutex::new(BatchInner { runtime, connector }),
        })
    }

    /// Store every payload. The batch either fully succeeds or returns the
    /// first failure.
    pub fn set_objects(&self, objects: &[(ObjectId, Vec<u8>)]) -> Result<(), StoreError> {
        let mut inner = self.batch.lock().unwrap_or_else(PoisonError::into_inner);
        let BatchInner { runtime, connector } = &mut *inner;

        runtime.block_on(async {
            let mut receivers = Vec::with_capacity(objects.len());
            for (object_id, payload) in objects {
                receivers.push(
                    connector
                        .begin_request(
                            ObjectRequestType::SetObject,
                            *object_id,
                            Some(payload.clone()),
                        )
                        .await?,
                );
            }

            for _ in &receivers {
                connector.routine().await?;
            }

            for receiver in receivers {
                let (header, payload) =
                    receiver.await.map_err(|_| StoreError::CompletionDropped)?;
                ensure_response_type(&header, &payload, &[ObjectResponseType::SetOk])?;
                ensure_empty_payload(&payload)?;
            }
            Ok(())
        })
    }

    /// Fetch every payload, blocking until all are available. Results come
    /// back in the order the ids were given.
    pub fn get_objects(&self, object_ids: &[ObjectId]) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut inner = self.batch.lock().unwrap_or_else(PoisonError::into_inner);
        let BatchInner { runtime, connector } = &mut *inner;

        runtime.block_on(async {
            let mut receivers = Vec::with_capacity(object_ids.len());
            for object_id in object_ids {
                receivers.push(
                    connector
                        .begin_request(ObjectRequestType::GetObject, *object_id, None)
                        .await?,
                );
            }

            for _ in &receivers {
                connector.routine().await?;
            }

            let mut payloads = Vec::with_capacity(receivers.len());
            for receiver in receivers {
                let (header, payload) =
                    receiver.await.map_err(|_| StoreError::CompletionDropped)?;
                ensure_response_type(&header, &payload, &[ObjectResponseType::GetOk])?;
                payloads.push(payload);
            }
            Ok(payloads)
        })
    }

    /// Remove every object. Objects the store never held are not an error.
    pub fn delete_objects(&self, object_ids: &[ObjectId]) -> Result<(), StoreError> {
        let mut inner = self.batch.lock().unwrap_or_else(PoisonError::into_inner);
        let BatchInner { runtime, connector } = &mut *inner;

        runtime.block_on(async {
            let mut receivers = Vec::with_capacity(object_ids.len());
            for object_id in object_ids {
                receivers.push(
                    connector
                        .begin_request(ObjectRequestType::DeleteObject, *object_id, None)
                        .await?,
                );
            }

            for _ in &receivers {
                connector.routine().await?;
            }

            for receiver in receivers {
                let (header, payload) =
                    receiver.await.map_err(|_| StoreError::CompletionDropped)?;
                ensure_response_type(
                    &header,
                    &payload,
                    &[ObjectResponseType::DelOk, ObjectResponseType::DelNotExists],
                )?;
                ensure_empty_payload(&payload)?;
            }
            Ok(())
        })
    }
}

impl ObjectStorage for BatchStoreConnector {
    fn set_object(&self, object_id: ObjectId, payload: &[u8]) -> Result<(), StoreError> {
        self.sync.set_object(object_id, payload)
    }

    fn get_object(&self, object_id: ObjectId) -> Result<Vec<u8>, StoreError> {
        self.sync.get_object(object_id)
    }

    fn delete_object(&self, object_id: ObjectId) -> Result<bool, StoreError> {
        self.sync.delete_object(object_id)
    }
}
