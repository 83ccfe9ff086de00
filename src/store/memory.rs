//! In-memory lock store (no persistence)
//!
//! This backend keeps keys and lists in process memory. It's useful for:
//! - Testing without an external store
//! - Running several replicas inside one process (they share one instance)
//! - Single-node deployments where losing the overflow backlog on restart is acceptable
//!
//! Expiry is evaluated lazily on access against `tokio::time::Instant`, so
//! tests running on a paused clock see keys expire when they advance time.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

use super::backend::LockStore;
use super::error::{StoreError, StoreResult};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    strings: HashMap<String, Entry>,
    lists: HashMap<String, VecDeque<String>>,
}

/// In-memory lock store
///
/// Cloning is not supported; share it behind an `Arc` instead so that every
/// replica observes the same keys.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    inner: Mutex<Inner>,

    /// Woken on every list push so timed pops can retry
    pushed: Notify,

    /// Simulated outage (every command fails with `StoreError::Closed`)
    offline: AtomicBool,
}

impl MemoryLockStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle a simulated outage
    ///
    /// While offline every command fails, which lets tests exercise the
    /// defensive demotion and retry paths.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
        if offline {
            self.pushed.notify_waiters();
        }
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn try_pop(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock();
        let list = inner.lists.get_mut(key)?;
        let value = list.pop_back();
        if list.is_empty() {
            inner.lists.remove(key);
        }
        value
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_online()?;
        let now = Instant::now();
        let inner = self.inner.lock();
        Ok(inner
            .strings
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.check_online()?;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.inner.lock().strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.check_online()?;
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if inner
            .strings
            .get(key)
            .is_some_and(|entry| entry.is_live(now))
        {
            return Ok(false);
        }

        inner.strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check_online()?;
        let mut inner = self.inner.lock();
        inner.strings.remove(key);
        inner.lists.remove(key);
        Ok(())
    }

    async fn list_push(&self, key: &str, value: &str) -> StoreResult<usize> {
        self.check_online()?;
        let len = {
            let mut inner = self.inner.lock();
            let list = inner.lists.entry(key.to_string()).or_default();
            list.push_front(value.to_string());
            list.len()
        };
        self.pushed.notify_waiters();
        Ok(len)
    }

    async fn list_pop(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>> {
        let deadline = Instant::now() + timeout;

        loop {
            self.check_online()?;

            // register interest before checking so a concurrent push is not missed
            let pushed = self.pushed.notified();
            tokio::pin!(pushed);
            pushed.as_mut().enable();

            if let Some(value) = self.try_pop(key) {
                return Ok(Some(value));
            }

            if tokio::time::timeout_at(deadline, pushed).await.is_err() {
                trace!("list pop on {key} timed out");
                return Ok(None);
            }
        }
    }

    async fn list_len(&self, key: &str) -> StoreResult<usize> {
        self.check_online()?;
        Ok(self.inner.lock().lists.get(key).map_or(0, VecDeque::len))
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_online()
    }
}
