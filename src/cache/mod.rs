//! Host database access and the read-mostly host cache
//!
//! ## Backends
//!
//! - **SQLite** (`storage-sqlite` feature): `hosts` and `host_snapshots` tables
//! - **In-Memory**: for testing and embedding

pub mod error;
pub mod host_cache;
pub mod source;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use error::{CacheError, CacheResult};
pub use host_cache::{HostCache, HostMap};
pub use source::{HostRecord, HostSnapshot, HostSource, MemoryHostSource, SnapshotSink};
