//! Phloem client library.
//!
//! Futures over submitted tasks, the registry that routes scheduler
//! messages to them, and the object-store connectors results travel
//! through.

pub mod channel;
pub mod error;
pub mod future;
pub mod registry;
pub mod store;

pub use channel::SchedulerChannel;
pub use error::ClientError;
pub use future::{ControlChannel, TaskFuture};
pub use registry::FutureRegistry;
pub use store::{
    AsyncStoreConnector, BatchStoreConnector, ObjectStorage, StoreError, SyncStoreConnector,
};
