//! Builds backends and porters from a [`Config`]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info};

use crate::analyzers::{LogAnalyzer, SnapshotAnalyzer};
use crate::broker::{ChannelBroker, MemoryBroker};
use crate::cache::{HostCache, SnapshotSink};
use crate::collector::{Analyzer, CollectorPorter, Shutdown};
use crate::config::{AnalyzerKind, BrokerConfig, Config, HostsConfig, StoreConfig};
use crate::store::{LockStore, MemoryLockStore};

/// Open the configured lock store
pub async fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn LockStore>> {
    match config {
        StoreConfig::Memory => {
            info!("using in-memory lock store, replicas are limited to this process");
            Ok(Arc::new(MemoryLockStore::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StoreConfig::Sqlite { path } => {
            let store = crate::store::sqlite::SqliteLockStore::new(path)
                .await
                .with_context(|| format!("failed to open lock store {}", path.display()))?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StoreConfig::Sqlite { .. } => {
            anyhow::bail!("sqlite lock store requested but the storage-sqlite feature is disabled")
        }
    }
}

/// Connect the configured broker
pub fn open_broker(config: &BrokerConfig) -> anyhow::Result<Arc<dyn ChannelBroker>> {
    match config {
        BrokerConfig::Memory => {
            info!("using in-memory broker, payloads only arrive through mock injection");
            Ok(Arc::new(MemoryBroker::new()))
        }
        #[cfg(feature = "broker-mqtt")]
        BrokerConfig::Mqtt {
            host,
            port,
            client_id,
            keep_alive_secs,
        } => {
            use crate::broker::mqtt::{MqttBroker, MqttSettings};

            Ok(Arc::new(MqttBroker::new(MqttSettings {
                host: host.clone(),
                port: *port,
                client_id: client_id.clone(),
                keep_alive: Duration::from_secs(*keep_alive_secs),
            })))
        }
        #[cfg(not(feature = "broker-mqtt"))]
        BrokerConfig::Mqtt { .. } => {
            anyhow::bail!("mqtt broker requested but the broker-mqtt feature is disabled")
        }
    }
}

/// Open the host database and build the initial host cache
#[cfg(feature = "storage-sqlite")]
pub async fn open_hosts(
    config: &HostsConfig,
) -> anyhow::Result<(Arc<HostCache>, Arc<dyn SnapshotSink>)> {
    let source = Arc::new(
        crate::cache::sqlite::SqliteHostSource::new(&config.path)
            .await
            .with_context(|| format!("failed to open host database {}", config.path.display()))?,
    );
    let cache = HostCache::build(
        source.clone(),
        Duration::from_secs(config.refresh_interval_secs),
    )
    .await
    .context("initial host cache build failed")?;

    let sink: Arc<dyn SnapshotSink> = source;
    Ok((Arc::new(cache), sink))
}

#[cfg(not(feature = "storage-sqlite"))]
pub async fn open_hosts(
    _config: &HostsConfig,
) -> anyhow::Result<(Arc<HostCache>, Arc<dyn SnapshotSink>)> {
    anyhow::bail!("a hosts database requires the storage-sqlite feature")
}

/// Create `replicas` porters for every configured porter
///
/// All replicas share `store` and `broker` and get their own process
/// identifier. The host cache, if any snapshot porter needs one, is shared by
/// all of them and refreshed by the first snapshot porter.
pub async fn build_porters(
    config: &Config,
    replicas: usize,
    store: Arc<dyn LockStore>,
    broker: Arc<dyn ChannelBroker>,
    shutdown: Shutdown,
) -> anyhow::Result<Vec<Arc<CollectorPorter>>> {
    let resolved = config.resolve_porters();

    let needs_hosts = resolved
        .iter()
        .any(|(_, kind)| *kind == AnalyzerKind::Snapshot);
    let hosts = match (&config.hosts, needs_hosts) {
        (Some(hosts), true) => Some(open_hosts(hosts).await?),
        (None, true) => anyhow::bail!("snapshot porters need a hosts database"),
        (_, false) => None,
    };

    let mut porters = Vec::new();
    let mut cache_owned = false;

    for replica in 0..replicas.max(1) {
        for (porter_config, kind) in &resolved {
            let analyzer: Arc<dyn Analyzer> = match (kind, &hosts) {
                (AnalyzerKind::Snapshot, Some((cache, sink))) => {
                    Arc::new(SnapshotAnalyzer::new(cache.clone(), sink.clone()))
                }
                (AnalyzerKind::Snapshot, None) => {
                    anyhow::bail!("porter '{}' has no hosts database", porter_config.name)
                }
                (AnalyzerKind::Log, _) => Arc::new(LogAnalyzer::new(porter_config.name.clone())),
            };

            let mut porter = CollectorPorter::new(
                porter_config.clone(),
                store.clone(),
                broker.clone(),
                analyzer,
                shutdown.clone(),
            );

            if *kind == AnalyzerKind::Snapshot && !cache_owned {
                if let Some((cache, _)) = &hosts {
                    porter = porter.with_host_cache(cache.clone());
                    cache_owned = true;
                }
            }

            debug!("created porter '{}' replica {replica}", porter_config.name);
            porters.push(Arc::new(porter));
        }
    }

    Ok(porters)
}
