//! Host snapshot analyzer
//!
//! Payloads look like
//!
//! ```json
//! { "cloudid": 0, "ip": "10.0.0.1,192.168.0.1", "data": { ... } }
//! ```
//!
//! `cloudid` may be a number or a numeric string; `ip` lists the host's
//! inner addresses, tried in order until one resolves through the host cache.
//! The latest `data` of every resolved host is upserted by host id.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::trace;

use crate::cache::{HostCache, HostSnapshot, SnapshotSink};
use crate::collector::Analyzer;

#[derive(Debug, Deserialize)]
struct SnapshotMessage {
    #[serde(rename = "cloudid")]
    cloud_id: CloudId,
    ip: String,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CloudId {
    Number(i64),
    Text(String),
}

impl CloudId {
    fn value(&self) -> anyhow::Result<i64> {
        match self {
            CloudId::Number(id) => Ok(*id),
            CloudId::Text(text) => text
                .trim()
                .parse()
                .with_context(|| format!("invalid cloudid '{text}'")),
        }
    }
}

pub struct SnapshotAnalyzer {
    cache: Arc<HostCache>,
    sink: Arc<dyn SnapshotSink>,
}

impl SnapshotAnalyzer {
    pub fn new(cache: Arc<HostCache>, sink: Arc<dyn SnapshotSink>) -> Self {
        Self { cache, sink }
    }
}

#[async_trait]
impl Analyzer for SnapshotAnalyzer {
    async fn analyze(&self, message: &str) -> anyhow::Result<()> {
        let snapshot: SnapshotMessage =
            serde_json::from_str(message).context("malformed snapshot payload")?;
        let cloud_id = snapshot.cloud_id.value()?;

        let mut host = None;
        for ip in snapshot.ip.split(',').map(str::trim).filter(|ip| !ip.is_empty()) {
            if let Some(found) = self.cache.resolve(cloud_id, ip).await? {
                host = Some(found);
                break;
            }
        }
        let host = host.with_context(|| {
            format!("no host known for cloud {cloud_id} and ip '{}'", snapshot.ip)
        })?;

        trace!("snapshot resolved to host {}", host.host_id);

        self.sink
            .upsert_snapshot(&HostSnapshot {
                host_id: host.host_id,
                cloud_id,
                inner_ip: host.inner_ip,
                payload: snapshot.data,
                updated_at: Utc::now(),
            })
            .await
            .context("failed to store host snapshot")?;

        Ok(())
    }
}
