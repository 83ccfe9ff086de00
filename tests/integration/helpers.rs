//! Helper functions for integration tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use telemetry_porter::{
    broker::MemoryBroker,
    collector::{Analyzer, CollectorPorter, Porter, Shutdown},
    config::ResolvedPorterConfig,
    store::{LockStore, MemoryLockStore, StoreError, StoreResult},
};

/// Porter settings with intervals short enough for tests
pub fn fast_config(name: &str, channels: &[&str]) -> ResolvedPorterConfig {
    let mut config =
        ResolvedPorterConfig::new(name, channels.iter().map(|c| c.to_string()).collect());
    config.namespace = "it:".to_string();
    config.workers = 2;
    config.receive_timeout = Duration::from_millis(50);
    config.election_interval = Duration::from_millis(50);
    config.lock_ttl = Duration::from_millis(300);
    config.retry_delay = Duration::from_millis(50);
    config.overflow_pop_timeout = Duration::from_millis(50);
    config.health_interval = Duration::from_millis(50);
    config.channel_empty_after = Duration::from_secs(60);
    config.reset_check_interval = Duration::from_millis(50);
    config
}

/// Counts payloads, optionally sleeping per payload
#[derive(Default)]
pub struct CountingAnalyzer {
    pub seen: AtomicUsize,
    pub delay: Option<Duration>,
}

impl CountingAnalyzer {
    pub fn slow(delay: Duration) -> Self {
        Self {
            seen: AtomicUsize::new(0),
            delay: Some(delay),
        }
    }

    pub fn seen(&self) -> usize {
        self.seen.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Analyzer for CountingAnalyzer {
    async fn analyze(&self, message: &str) -> anyhow::Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if message == "panic" {
            panic!("analyzer bug triggered by test payload");
        }
        self.seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Lock store view that can be cut off from the shared store
///
/// Lets a single replica lose its store connection while the others keep
/// theirs.
pub struct FlakyStore {
    inner: Arc<MemoryLockStore>,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryLockStore>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::ConnectionFailed("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LockStore for FlakyStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.check()?;
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn list_push(&self, key: &str, value: &str) -> StoreResult<usize> {
        self.check()?;
        self.inner.list_push(key, value).await
    }

    async fn list_pop(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>> {
        self.check()?;
        self.inner.list_pop(key, timeout).await
    }

    async fn list_len(&self, key: &str) -> StoreResult<usize> {
        self.check()?;
        self.inner.list_len(key).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check()?;
        self.inner.ping().await
    }
}

/// Poll `condition` every few milliseconds, failing the test after `limit`
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Spawn `porter.run()` in the background
pub fn spawn_porter(porter: &Arc<CollectorPorter>) -> tokio::task::JoinHandle<anyhow::Result<()>> {
    let porter = porter.clone();
    tokio::spawn(async move { porter.run().await })
}

/// A porter on a shared memory store and broker
pub fn memory_porter(
    config: ResolvedPorterConfig,
    store: Arc<dyn LockStore>,
    broker: Arc<MemoryBroker>,
    analyzer: Arc<CountingAnalyzer>,
    shutdown: Shutdown,
    identifier: &str,
) -> Arc<CollectorPorter> {
    Arc::new(
        CollectorPorter::new(config, store, broker, analyzer, shutdown).with_identifier(identifier),
    )
}
