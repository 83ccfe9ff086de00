//! Master-only subscription session
//!
//! A session subscribes to the porter's channels and feeds every payload
//! through [`Spill::offer`]. It re-runs the election once per election
//! interval and ends as soon as mastership is lost, shutdown is signalled or
//! the broker fails; the subscription is torn down in every case.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

use super::elector::MasterElector;
use super::spill::Spill;
use super::stats::PorterCounters;
use super::supervisor::Shutdown;
use crate::broker::{BrokerResult, ChannelBroker};

/// Why a session ended without a broker error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    LeadershipLost,
    Shutdown,
}

pub struct ChannelSubscriber {
    porter: String,
    channels: Vec<String>,
    broker: Arc<dyn ChannelBroker>,
    elector: Arc<MasterElector>,
    spill: Arc<Spill>,
    counters: Arc<PorterCounters>,
    receive_timeout: Duration,
    election_interval: Duration,
}

impl ChannelSubscriber {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        porter: impl Into<String>,
        channels: Vec<String>,
        broker: Arc<dyn ChannelBroker>,
        elector: Arc<MasterElector>,
        spill: Arc<Spill>,
        counters: Arc<PorterCounters>,
        receive_timeout: Duration,
        election_interval: Duration,
    ) -> Self {
        Self {
            porter: porter.into(),
            channels,
            broker,
            elector,
            spill,
            counters,
            receive_timeout,
            election_interval,
        }
    }

    /// Run one subscription session
    ///
    /// The caller must already be master. Broker errors are returned after
    /// the subscription has been torn down.
    #[instrument(skip_all, fields(porter = %self.porter))]
    pub async fn run_session(&self, shutdown: &mut Shutdown) -> BrokerResult<SessionEnd> {
        let mut subscription = self.broker.subscribe(&self.channels).await?;
        info!("subscribed to {:?}", self.channels);

        // a fresh subscription counts as channel activity
        self.counters.touch_channel();
        let mut last_election = Instant::now();

        let end = loop {
            if shutdown.is_triggered() {
                break Ok(SessionEnd::Shutdown);
            }

            if last_election.elapsed() >= self.election_interval {
                last_election = Instant::now();
                if !self.elector.try_acquire_or_renew().await {
                    break Ok(SessionEnd::LeadershipLost);
                }
            }

            let until_election = self
                .election_interval
                .saturating_sub(last_election.elapsed())
                .max(Duration::from_millis(1));
            let wait = self.receive_timeout.min(until_election);

            let received = tokio::select! {
                received = subscription.receive(wait) => received,
                _ = shutdown.wait() => break Ok(SessionEnd::Shutdown),
            };

            match received {
                Ok(Some(message)) => {
                    trace!("received payload");
                    PorterCounters::incr(&self.counters.received);
                    self.counters.touch_channel();
                    self.spill.offer(message);
                }
                Ok(None) => trace!("no payload within {wait:?}"),
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = subscription.unsubscribe().await {
            warn!("failed to unsubscribe cleanly: {e}");
        }
        debug!("session ended: {end:?}");

        end
    }
}
