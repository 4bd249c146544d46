//! Publish/subscribe transport abstraction
//!
//! The purpose layer only needs what a plain topic-based broker offers:
//! connect, publish, subscribe, optional user properties, and an inbound
//! message stream. [`Transport`] captures that surface; [`MemoryBroker`] is an
//! in-process implementation used by the benchmark runner and the tests.

mod memory;
pub mod topic;

pub use memory::{BrokerConfig, BrokerMetrics, MemoryBroker, MemoryClient};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport failures
///
/// These are propagated to the caller; nothing in this crate retries them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Client {0} is not connected")]
    NotConnected(String),

    #[error("Failed to connect to {address}:{port}: {reason}")]
    ConnectFailed { address: String, port: u16, reason: String },

    #[error("Inbound channel closed for client {0}")]
    ChannelClosed(String),

    #[error("Invalid topic {0:?}")]
    InvalidTopic(String),

    #[error("Broker unavailable")]
    BrokerUnavailable,
}

/// Ordered MQTT v5 style user properties
///
/// Keys may repeat; lookups return the first match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Properties(Vec<(String, String)>);

impl Properties {
    /// Create an empty property list
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }

    /// First value stored under `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A message delivered to a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
    pub properties: Properties,
    /// Delivered from the broker's retained store rather than live
    pub retained: bool,
}

/// Collaborator interface required from the publish/subscribe transport
///
/// Delivery is at-least-once per subscription and FIFO per publisher/subscriber
/// pair. Inbound messages arrive on the receiver returned by
/// [`Transport::take_inbound`], which yields a fresh receiver per connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Client identifier used on the broker
    fn client_id(&self) -> &str;

    /// Open a session with the broker
    async fn connect(&self, address: &str, port: u16) -> Result<(), TransportError>;

    /// Publish a message
    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        properties: Properties,
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Subscribe to a topic filter
    async fn subscribe(&self, topic_filter: &str, properties: Properties) -> Result<(), TransportError>;

    /// Close the session
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Whether the session is currently open
    fn is_connected(&self) -> bool;

    /// Take the inbound receiver for the current connection
    ///
    /// Returns None before connecting or if already taken.
    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>>;
}
