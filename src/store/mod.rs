//! Shared lock store used for master election, the overflow queue and health status
//!
//! This module provides a trait-based abstraction over a Redis-like key/value
//! store shared by every replica of a collector.
//!
//! ## Design
//!
//! - **Trait-based**: `LockStore` allows swapping implementations
//! - **Async**: All operations are async for compatibility with Tokio tasks
//! - **Advisory**: Locks are conditional writes with expiry, not consensus
//!
//! ## Backends
//!
//! - **SQLite** (default): File-backed, shared by processes on one host
//! - **In-Memory**: Shared by replicas inside one process, for testing
//!
//! ## Keys
//!
//! Every key is namespaced as `<prefix><collector name>:<suffix>`, see [`StoreKeys`].

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::LockStore;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryLockStore;

/// Suffix of the master election key
pub const MASTER_LOCK_SUFFIX: &str = "masterlock";

/// Suffix of the overflow (slave) queue key
pub const QUEUE_SUFFIX: &str = "queue";

/// Suffix of the channel health status key
pub const CHANNEL_STATUS_SUFFIX: &str = "channelstatus";

/// The namespaced keys one collector uses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKeys {
    pub master_lock: String,
    pub queue: String,
    pub channel_status: String,
}

impl StoreKeys {
    pub fn new(prefix: &str, name: &str) -> Self {
        Self {
            master_lock: format!("{prefix}{name}:{MASTER_LOCK_SUFFIX}"),
            queue: format!("{prefix}{name}:{QUEUE_SUFFIX}"),
            channel_status: format!("{prefix}{name}:{CHANNEL_STATUS_SUFFIX}"),
        }
    }
}
