//! # Broker Abstraction
//!
//! The relay never talks to a network client directly. A [`Connector`] opens
//! a [`Connection`], which pairs a [`Broker`] handle for outbound calls with
//! the stream of [`BrokerEvent`]s the broker pushes back.
//!
//! Failures are returned as [`PubSubError`](crate::PubSubError) values; a
//! broker implementation must never panic on a refused call.

use crate::config::BrokerConfig;
use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Something the broker pushes to the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// A message published on a topic this process is subscribed to.
    Message { topic: String, payload: String },
    /// The connection is unusable. Fatal for the whole process.
    Error(String),
}

/// Outbound half of a broker connection.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<()>;

    async fn unsubscribe(&self, topic: &str) -> Result<()>;

    async fn publish(&self, topic: &str, payload: &str) -> Result<()>;

    /// Close the connection. Calling it twice is harmless.
    async fn close(&self);
}

/// An open connection.
pub struct Connection {
    pub broker: std::sync::Arc<dyn Broker>,
    pub events: mpsc::UnboundedReceiver<BrokerEvent>,
}

/// Opens broker connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &BrokerConfig) -> Result<Connection>;
}
