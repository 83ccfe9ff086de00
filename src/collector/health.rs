//! Periodic channel health reporting
//!
//! Every replica publishes a status code for its porter to the
//! `channelstatus` key. The report is observability only; nothing in the
//! collector reacts to it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, instrument, warn};

use super::elector::MasterElector;
use super::stats::PorterCounters;
use super::supervisor::Shutdown;
use crate::broker::ChannelBroker;
use crate::store::{LockStore, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Ok,
    /// The broker could not be reached
    ChannelClosed,
    /// The master has not received anything for too long
    ChannelEmpty,
}

impl ChannelStatus {
    /// Numeric code stored in the lock store
    pub fn code(self) -> u8 {
        match self {
            ChannelStatus::Ok => 0,
            ChannelStatus::ChannelClosed => 1,
            ChannelStatus::ChannelEmpty => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ChannelStatus::Ok),
            1 => Some(ChannelStatus::ChannelClosed),
            2 => Some(ChannelStatus::ChannelEmpty),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelStatus::Ok => write!(f, "OK"),
            ChannelStatus::ChannelClosed => write!(f, "channel closed"),
            ChannelStatus::ChannelEmpty => write!(f, "channel empty"),
        }
    }
}

pub struct HealthReporter {
    porter: String,
    key: String,
    broker: Arc<dyn ChannelBroker>,
    store: Arc<dyn LockStore>,
    elector: Arc<MasterElector>,
    counters: Arc<PorterCounters>,
    interval: Duration,
    empty_after: Duration,
}

impl HealthReporter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        porter: impl Into<String>,
        key: impl Into<String>,
        broker: Arc<dyn ChannelBroker>,
        store: Arc<dyn LockStore>,
        elector: Arc<MasterElector>,
        counters: Arc<PorterCounters>,
        interval: Duration,
        empty_after: Duration,
    ) -> Self {
        Self {
            porter: porter.into(),
            key: key.into(),
            broker,
            store,
            elector,
            counters,
            interval,
            empty_after,
        }
    }

    /// Probe the broker, the store and (on the master) channel activity
    pub async fn check(&self) -> ChannelStatus {
        if let Err(e) = self.broker.ping().await {
            warn!("broker ping failed: {e}");
            return ChannelStatus::ChannelClosed;
        }

        if let Err(e) = self.store.ping().await {
            error!("lock store ping failed: {e}");
        }

        if self.elector.is_master() {
            let idle = self
                .counters
                .last_message_at()
                .map(|at| (Utc::now() - at).to_std().unwrap_or_default());
            match idle {
                Some(idle) if idle < self.empty_after => {}
                _ => return ChannelStatus::ChannelEmpty,
            }
        }

        ChannelStatus::Ok
    }

    /// Check and publish the status with an expiry of two intervals
    pub async fn report(&self) -> StoreResult<ChannelStatus> {
        let status = self.check().await;
        self.store
            .set(
                &self.key,
                &status.code().to_string(),
                Some(self.interval * 2),
            )
            .await?;
        Ok(status)
    }

    #[instrument(skip_all, fields(porter = %self.porter))]
    pub async fn run(&self, mut shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait() => break,
            }

            match self.report().await {
                Ok(status) => debug!("channel status: {status}"),
                Err(e) => error!("failed to publish channel status: {e}"),
            }
        }
    }
}
