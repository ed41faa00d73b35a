//! Canonical default values shared across the cluster.

pub const DEFAULT_SCHEDULER_BIND_ADDR: &str = "tcp://127.0.0.1:6378";
pub const DEFAULT_STORE_ADDR: &str = "tcp://127.0.0.1:6379";
pub const DEFAULT_PER_WORKER_QUEUE_SIZE: u32 = 1000;
pub const CANCELED_BY_CLIENT_MESSAGE: &str = "Canceled by client";
