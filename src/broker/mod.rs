//! Pub/sub brokers that telemetry is published on
//!
//! ## Backends
//!
//! - **MQTT** (`broker-mqtt` feature): topics on an MQTT broker via `rumqttc`
//! - **In-Memory**: broadcast channels inside one process, for testing and embedding

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(feature = "broker-mqtt")]
pub mod mqtt;

pub use backend::{ChannelBroker, Subscription};
pub use error::{BrokerError, BrokerResult};
pub use memory::MemoryBroker;
