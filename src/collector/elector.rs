//! Master election over the shared lock store
//!
//! One lock key per collector name. The holder writes its process identifier
//! with an expiry and renews it on every election round; everyone else keeps
//! trying a conditional write that only succeeds once the key has expired or
//! been resigned. The lock is advisory: a crashed master leaves a window of at
//! most one TTL in which nobody (or briefly two replicas) drains the channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sysinfo::System;
use tracing::{debug, error, info, instrument, warn};

use crate::store::LockStore;

/// Opaque identifier of this process: host name, pid and a random suffix
pub fn process_identifier() -> String {
    let host = System::host_name().unwrap_or_else(|| "unknown-host".to_string());
    format!(
        "{host}-{}-{}",
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    )
}

pub struct MasterElector {
    store: Arc<dyn LockStore>,
    key: String,
    identifier: String,
    ttl: Duration,
    is_master: AtomicBool,
}

impl MasterElector {
    pub fn new(
        store: Arc<dyn LockStore>,
        key: impl Into<String>,
        identifier: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            identifier: identifier.into(),
            ttl,
            is_master: AtomicBool::new(false),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current belief of this replica, as of the last election round
    pub fn is_master(&self) -> bool {
        self.is_master.load(Ordering::SeqCst)
    }

    /// Run one election round, returning whether this replica is master afterwards
    ///
    /// Any store error demotes this replica; a master whose lock value no
    /// longer matches its identifier demotes immediately and does not retry
    /// within the same round.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn try_acquire_or_renew(&self) -> bool {
        let master = if self.is_master() {
            self.renew().await
        } else {
            self.acquire().await
        };

        let was_master = self.is_master.swap(master, Ordering::SeqCst);
        match (was_master, master) {
            (false, true) => info!("became master as {}", self.identifier),
            (true, false) => warn!("lost mastership"),
            _ => {}
        }
        master
    }

    async fn acquire(&self) -> bool {
        match self
            .store
            .set_if_absent(&self.key, &self.identifier, self.ttl)
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                error!("failed to acquire master lock: {e}");
                false
            }
        }
    }

    async fn renew(&self) -> bool {
        match self.store.get(&self.key).await {
            Ok(Some(holder)) if holder == self.identifier => {}
            Ok(Some(holder)) => {
                warn!("master lock is held by {holder}");
                return false;
            }
            Ok(None) => {
                warn!("master lock expired before renewal");
                return false;
            }
            Err(e) => {
                error!("failed to read master lock: {e}");
                return false;
            }
        }

        match self
            .store
            .set(&self.key, &self.identifier, Some(self.ttl))
            .await
        {
            Ok(()) => {
                debug!("renewed master lock");
                true
            }
            Err(e) => {
                error!("failed to renew master lock: {e}");
                false
            }
        }
    }

    /// Give up mastership, deleting the lock only if it is still ours
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn resign(&self) {
        let was_master = self.is_master.swap(false, Ordering::SeqCst);

        match self.store.get(&self.key).await {
            Ok(Some(holder)) if holder == self.identifier => {
                if let Err(e) = self.store.delete(&self.key).await {
                    error!("failed to release master lock: {e}");
                } else {
                    info!("resigned mastership");
                }
            }
            Ok(_) => {
                if was_master {
                    debug!("master lock no longer ours, nothing to release");
                }
            }
            Err(e) => error!("failed to read master lock while resigning: {e}"),
        }
    }
}
