//! Host database traits and the in-memory implementation

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::error::CacheResult;

/// Flat host record as kept in the host cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub host_id: i64,
    pub cloud_id: i64,
    pub inner_ip: String,
    pub outer_ip: Option<String>,
    pub host_name: Option<String>,
    pub os_type: Option<String>,
}

impl HostRecord {
    pub fn new(host_id: i64, cloud_id: i64, inner_ip: impl Into<String>) -> Self {
        Self {
            host_id,
            cloud_id,
            inner_ip: inner_ip.into(),
            outer_ip: None,
            host_name: None,
            os_type: None,
        }
    }
}

/// Latest resource snapshot of a host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostSnapshot {
    pub host_id: i64,
    pub cloud_id: i64,
    pub inner_ip: String,
    pub payload: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Read access to the host database
#[async_trait]
pub trait HostSource: Send + Sync {
    /// Every known host, used for full cache builds
    async fn list_hosts(&self) -> CacheResult<Vec<HostRecord>>;

    /// Point query used on cache misses
    async fn find_host(&self, cloud_id: i64, inner_ip: &str) -> CacheResult<Option<HostRecord>>;
}

/// Write access for the latest host snapshots
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// Insert or replace the snapshot of `snapshot.host_id`
    async fn upsert_snapshot(&self, snapshot: &HostSnapshot) -> CacheResult<()>;
}

/// In-memory host database
#[derive(Debug, Default)]
pub struct MemoryHostSource {
    hosts: RwLock<Vec<HostRecord>>,
    snapshots: RwLock<HashMap<i64, HostSnapshot>>,
}

impl MemoryHostSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hosts(hosts: Vec<HostRecord>) -> Self {
        Self {
            hosts: RwLock::new(hosts),
            snapshots: RwLock::default(),
        }
    }

    pub fn insert_host(&self, host: HostRecord) {
        self.hosts.write().push(host);
    }

    pub fn snapshot(&self, host_id: i64) -> Option<HostSnapshot> {
        self.snapshots.read().get(&host_id).cloned()
    }
}

#[async_trait]
impl HostSource for MemoryHostSource {
    async fn list_hosts(&self) -> CacheResult<Vec<HostRecord>> {
        Ok(self.hosts.read().clone())
    }

    async fn find_host(&self, cloud_id: i64, inner_ip: &str) -> CacheResult<Option<HostRecord>> {
        Ok(self
            .hosts
            .read()
            .iter()
            .find(|host| host.cloud_id == cloud_id && host.inner_ip == inner_ip)
            .cloned())
    }
}

#[async_trait]
impl SnapshotSink for MemoryHostSource {
    async fn upsert_snapshot(&self, snapshot: &HostSnapshot) -> CacheResult<()> {
        self.snapshots
            .write()
            .insert(snapshot.host_id, snapshot.clone());
        Ok(())
    }
}
