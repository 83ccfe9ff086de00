//! Channel broker trait definitions

use std::time::Duration;

use async_trait::async_trait;

use super::error::BrokerResult;

/// A pub/sub broker that collectors subscribe to
///
/// The broker is only ever subscribed to by the current master of a
/// collector; every replica pings it for health reporting.
#[async_trait]
pub trait ChannelBroker: Send + Sync {
    /// Subscribe to one or more channels
    ///
    /// The returned subscription yields payloads from all channels in the
    /// order the broker delivers them.
    async fn subscribe(&self, channels: &[String]) -> BrokerResult<Box<dyn Subscription>>;

    /// Lightweight connectivity probe
    async fn ping(&self) -> BrokerResult<()>;
}

/// An active subscription to one or more broker channels
#[async_trait]
pub trait Subscription: Send {
    /// Wait up to `timeout` for the next payload
    ///
    /// A timeout is not an error and yields `Ok(None)`, so callers can do
    /// periodic work (leadership checks, shutdown) between messages.
    async fn receive(&mut self, timeout: Duration) -> BrokerResult<Option<String>>;

    /// Tear the subscription down
    async fn unsubscribe(self: Box<Self>) -> BrokerResult<()>;
}
