//! Double-buffered host cache
//!
//! Readers load the active snapshot through an [`ArcSwap`] and never wait on
//! a refresh or take a lock. A refresh scans the host source without holding
//! any lock, then installs the new map with a single pointer swap. Misses
//! fall back to a point query; a hit from that query is merged into a copy of
//! the snapshot with [`ArcSwap::rcu`], unless a swap happened while the query
//! was in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, trace};

use super::error::CacheResult;
use super::source::{HostRecord, HostSource};
use crate::collector::Shutdown;

/// `cloudID::innerIP` → host record
pub type HostMap = HashMap<String, HostRecord>;

pub struct HostCache {
    source: Arc<dyn HostSource>,
    snapshot: ArcSwap<HostMap>,
    generation: AtomicU64,
    /// Sequence number handed to each scan
    scans: AtomicU64,
    /// Sequence number of the installed snapshot; serializes swaps only
    installed: Mutex<u64>,
    refresh_interval: Duration,
}

impl HostCache {
    /// Cache key of a host
    pub fn key(cloud_id: i64, inner_ip: &str) -> String {
        format!("{cloud_id}::{inner_ip}")
    }

    /// Build the first snapshot; the cache is not usable before this returns
    #[instrument(skip(source))]
    pub async fn build(
        source: Arc<dyn HostSource>,
        refresh_interval: Duration,
    ) -> CacheResult<Self> {
        let hosts = Self::scan(source.as_ref()).await?;
        info!("host cache built with {} hosts", hosts.len());

        Ok(Self {
            source,
            snapshot: ArcSwap::from_pointee(hosts),
            generation: AtomicU64::new(0),
            scans: AtomicU64::new(0),
            installed: Mutex::new(0),
            refresh_interval,
        })
    }

    async fn scan(source: &dyn HostSource) -> CacheResult<HostMap> {
        let hosts = source.list_hosts().await?;
        Ok(hosts
            .into_iter()
            .map(|host| (Self::key(host.cloud_id, &host.inner_ip), host))
            .collect())
    }

    /// The active snapshot
    pub fn snapshot(&self) -> Arc<HostMap> {
        self.snapshot.load_full()
    }

    /// Incremented on every swap, just before the new map is stored
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Number of hosts in the active snapshot
    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look a host up without touching the host source
    pub fn get(&self, cloud_id: i64, inner_ip: &str) -> Option<HostRecord> {
        self.snapshot
            .load()
            .get(&Self::key(cloud_id, inner_ip))
            .cloned()
    }

    /// Look a host up, falling back to a point query on a miss
    pub async fn resolve(&self, cloud_id: i64, inner_ip: &str) -> CacheResult<Option<HostRecord>> {
        if let Some(host) = self.get(cloud_id, inner_ip) {
            return Ok(Some(host));
        }

        let generation = self.generation();
        trace!("host cache miss for {cloud_id}::{inner_ip}");
        let found = self.source.find_host(cloud_id, inner_ip).await?;

        if let Some(host) = &found {
            let key = Self::key(cloud_id, inner_ip);
            self.snapshot.rcu(|current| {
                // a swap since the query started makes this result stale
                if self.generation() != generation || current.contains_key(&key) {
                    return Arc::clone(current);
                }
                let mut next = HostMap::clone(current);
                next.insert(key.clone(), host.clone());
                Arc::new(next)
            });
        }

        Ok(found)
    }

    /// Rebuild the snapshot from the host source and swap it in
    ///
    /// Returns the number of hosts in the new snapshot. If a newer scan has
    /// already been installed the result of this one is discarded.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> CacheResult<usize> {
        let scan = self.scans.fetch_add(1, Ordering::SeqCst) + 1;
        let hosts = Self::scan(self.source.as_ref()).await?;
        let count = hosts.len();

        let mut installed = self.installed.lock();
        if *installed > scan {
            debug!("discarding host scan {scan}, scan {} is newer", *installed);
            return Ok(count);
        }
        *installed = scan;

        // bumped first so an in-flight point query cannot merge into the new map
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.snapshot.store(Arc::new(hosts));

        debug!("host cache refreshed with {count} hosts");
        Ok(count)
    }

    /// Refresh on the configured interval until shutdown
    pub async fn run_refresh_loop(self: Arc<Self>, mut shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the initial build already happened
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait() => break,
            }

            match self.refresh().await {
                Ok(count) => info!("host cache refreshed, {count} hosts"),
                Err(e) => error!("host cache refresh failed, keeping previous snapshot: {e}"),
            }
        }
    }
}
