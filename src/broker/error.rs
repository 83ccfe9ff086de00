//! Error types for channel broker operations

use std::fmt;

/// Result type alias for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors that can occur while talking to the pub/sub broker
#[derive(Debug)]
pub enum BrokerError {
    /// Connection to the broker failed
    ConnectionFailed(String),

    /// Subscribing to a channel failed
    SubscribeFailed(String),

    /// The subscription or broker was closed
    ChannelClosed,

    /// A payload could not be decoded as UTF-8 text
    InvalidPayload(String),

    /// Backend-specific error
    BackendError(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::ConnectionFailed(msg) => write!(f, "failed to connect to broker: {}", msg),
            BrokerError::SubscribeFailed(msg) => write!(f, "subscribe failed: {}", msg),
            BrokerError::ChannelClosed => write!(f, "broker channel closed"),
            BrokerError::InvalidPayload(msg) => write!(f, "invalid payload: {}", msg),
            BrokerError::BackendError(msg) => write!(f, "broker backend error: {}", msg),
        }
    }
}

impl std::error::Error for BrokerError {}
