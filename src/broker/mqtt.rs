//! MQTT broker backend
//!
//! Each subscription owns its own `rumqttc` client and event loop, so a
//! collector that loses leadership simply drops its connection and the next
//! master opens a fresh one. The event loop is only driven from
//! `Subscription::receive`, which the subscriber calls continuously while it
//! is master. A ping is a full CONNECT/CONNACK handshake on a throwaway
//! client, so a listener that accepts sockets but refuses sessions fails it.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, QoS};
use tracing::{debug, instrument, trace, warn};

use super::backend::{ChannelBroker, Subscription};
use super::error::{BrokerError, BrokerResult};

/// Requests buffered between the client handle and the event loop
const REQUEST_CAPACITY: usize = 64;

/// Time a ping may take to get a CONNACK back
const PING_TIMEOUT: Duration = Duration::from_secs(3);

/// Time given to the DISCONNECT sent after a successful ping
const PING_DISCONNECT_TIMEOUT: Duration = Duration::from_millis(200);

/// Connection settings for an MQTT broker
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    /// Prefix of the client id; every subscription appends a random suffix
    pub client_id: String,
    pub keep_alive: Duration,
}

/// MQTT-backed channel broker; channel names map 1:1 to topics
pub struct MqttBroker {
    settings: MqttSettings,
}

impl MqttBroker {
    pub fn new(settings: MqttSettings) -> Self {
        Self { settings }
    }

    fn options(&self) -> MqttOptions {
        let client_id = format!("{}-{}", self.settings.client_id, uuid::Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, &self.settings.host, self.settings.port);
        options.set_keep_alive(self.settings.keep_alive);
        options
    }
}

#[async_trait]
impl ChannelBroker for MqttBroker {
    #[instrument(skip(self), fields(host = %self.settings.host))]
    async fn subscribe(&self, channels: &[String]) -> BrokerResult<Box<dyn Subscription>> {
        if channels.is_empty() {
            return Err(BrokerError::SubscribeFailed(
                "no channels to subscribe to".to_string(),
            ));
        }

        let (client, eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);

        for channel in channels {
            client
                .subscribe(channel.as_str(), QoS::AtLeastOnce)
                .await
                .map_err(|e| BrokerError::SubscribeFailed(format!("{channel}: {e}")))?;
        }

        debug!("subscribe requests queued for {channels:?}");

        Ok(Box::new(MqttSubscription {
            client,
            eventloop,
            channels: channels.to_vec(),
        }))
    }

    /// Open a short-lived session and wait for the broker to accept it
    #[instrument(skip(self), fields(host = %self.settings.host))]
    async fn ping(&self) -> BrokerResult<()> {
        let (client, mut eventloop) = AsyncClient::new(self.options(), 1);

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                        return match ack.code {
                            ConnectReturnCode::Success => Ok(()),
                            code => Err(BrokerError::ConnectionFailed(format!(
                                "session refused: {code:?}"
                            ))),
                        };
                    }
                    Ok(_) => {}
                    Err(e) => return Err(BrokerError::ConnectionFailed(e.to_string())),
                }
            }
        };

        let result = match tokio::time::timeout(PING_TIMEOUT, handshake).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::ConnectionFailed(format!(
                "no CONNACK from {}:{} within {PING_TIMEOUT:?}",
                self.settings.host, self.settings.port
            ))),
        };

        if result.is_ok() && client.disconnect().await.is_ok() {
            let _ = tokio::time::timeout(PING_DISCONNECT_TIMEOUT, eventloop.poll()).await;
        }
        trace!("ping result: {result:?}");

        result
    }
}

struct MqttSubscription {
    client: AsyncClient,
    eventloop: EventLoop,
    channels: Vec<String>,
}

impl MqttSubscription {
    async fn next_publish(&mut self) -> BrokerResult<String> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    trace!("publish on {}", publish.topic);
                    return String::from_utf8(publish.payload.to_vec())
                        .map_err(|e| BrokerError::InvalidPayload(e.to_string()));
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => {
                    return Err(BrokerError::ChannelClosed);
                }
                Ok(_) => {}
                Err(e) => return Err(BrokerError::ConnectionFailed(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl Subscription for MqttSubscription {
    async fn receive(&mut self, timeout: Duration) -> BrokerResult<Option<String>> {
        loop {
            match tokio::time::timeout(timeout, self.next_publish()).await {
                Ok(Ok(payload)) => return Ok(Some(payload)),
                // a single undecodable payload must not end the subscription
                Ok(Err(BrokerError::InvalidPayload(e))) => {
                    warn!("dropping non UTF-8 payload: {e}");
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => return Ok(None),
            }
        }
    }

    async fn unsubscribe(self: Box<Self>) -> BrokerResult<()> {
        let MqttSubscription {
            client,
            mut eventloop,
            channels,
        } = *self;

        for channel in &channels {
            if let Err(e) = client.unsubscribe(channel.as_str()).await {
                warn!("failed to unsubscribe from {channel}: {e}");
            }
        }

        client
            .disconnect()
            .await
            .map_err(|e| BrokerError::BackendError(e.to_string()))?;

        // flush the queued unsubscribe/disconnect requests
        let _ = tokio::time::timeout(Duration::from_millis(500), async {
            while eventloop.poll().await.is_ok() {}
        })
        .await;

        Ok(())
    }
}
