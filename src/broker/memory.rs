//! In-process pub/sub broker
//!
//! Channels are Tokio broadcast channels created on first use. Publishing to
//! a channel without subscribers drops the payload, the same way a Redis
//! `PUBLISH` with no listeners does. Slow subscribers lag and lose payloads
//! rather than blocking the publisher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, SelectAll, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use super::backend::{ChannelBroker, Subscription};
use super::error::{BrokerError, BrokerResult};

/// Per-channel buffer before subscribers start lagging
const CHANNEL_CAPACITY: usize = 4096;

/// In-process broker shared behind an `Arc`
#[derive(Debug, Default)]
pub struct MemoryBroker {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    closed: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publish a payload, returning the number of subscribers that received it
    pub fn publish(&self, channel: &str, payload: impl Into<String>) -> usize {
        if self.closed.load(Ordering::SeqCst) {
            return 0;
        }

        match self.sender(channel).send(payload.into()) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("no subscribers on {channel}, payload dropped");
                0
            }
        }
    }

    /// Number of live subscriptions on a channel
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Close the broker: every subscription ends and pings fail
    pub fn close(&self) {
        debug!("closing in-memory broker");
        self.closed.store(true, Ordering::SeqCst);
        self.channels.lock().clear();
    }

    /// Re-open a closed broker
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }
}

fn channel_stream(channel: String, rx: broadcast::Receiver<String>) -> BoxStream<'static, String> {
    futures::stream::unfold((channel, rx), |(channel, mut rx)| async move {
        loop {
            match rx.recv().await {
                Ok(payload) => return Some((payload, (channel, rx))),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("subscription on {channel} lagged, skipped {skipped} payloads");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

#[async_trait]
impl ChannelBroker for MemoryBroker {
    async fn subscribe(&self, channels: &[String]) -> BrokerResult<Box<dyn Subscription>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::ConnectionFailed("broker is closed".to_string()));
        }

        if channels.is_empty() {
            return Err(BrokerError::SubscribeFailed(
                "no channels to subscribe to".to_string(),
            ));
        }

        let mut streams = SelectAll::new();
        for channel in channels {
            streams.push(channel_stream(
                channel.clone(),
                self.sender(channel).subscribe(),
            ));
        }

        debug!("subscribed to {channels:?}");
        Ok(Box::new(MemorySubscription { streams }))
    }

    async fn ping(&self) -> BrokerResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::ChannelClosed);
        }
        Ok(())
    }
}

struct MemorySubscription {
    streams: SelectAll<BoxStream<'static, String>>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn receive(&mut self, timeout: Duration) -> BrokerResult<Option<String>> {
        match tokio::time::timeout(timeout, self.streams.next()).await {
            Ok(Some(payload)) => Ok(Some(payload)),
            Ok(None) => Err(BrokerError::ChannelClosed),
            Err(_) => Ok(None),
        }
    }

    async fn unsubscribe(self: Box<Self>) -> BrokerResult<()> {
        // dropping the receivers is the unsubscribe
        Ok(())
    }
}
