//! Seams between the RPC layer and a broker backend.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::broker::{BrokerError, Delivery, ExchangeKind, OutboundMessage, QueueSpec, ReturnedMessage};

/// An authenticated broker connection.
/// Implementations: AMQP 0-9-1 via `amqprs`, in-process memory broker (tests).
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a new logical channel on this connection.
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError>;

    /// Close the connection and every channel opened on it.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// A logical channel used to declare topology, publish and consume.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare an exchange. Redeclaring with the same kind is a no-op.
    async fn exchange_declare(&self, exchange: &str, kind: ExchangeKind) -> Result<(), BrokerError>;

    /// Declare a queue, returning its (possibly server-generated) name.
    async fn queue_declare(&self, queue: QueueSpec) -> Result<String, BrokerError>;

    /// Bind a queue to an exchange under `routing_key`.
    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    /// Start consuming `queue` with automatic acknowledgement.
    async fn consume(&self, queue: &str) -> Result<mpsc::UnboundedReceiver<Delivery>, BrokerError>;

    /// Take the stream of mandatory messages the broker could not route.
    /// Returns `None` once the stream has been taken.
    fn take_returns(&self) -> Option<mpsc::UnboundedReceiver<ReturnedMessage>>;

    /// Publish `message` to `exchange` under `routing_key`.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), BrokerError>;

    /// Close the channel.
    async fn close(&self) -> Result<(), BrokerError>;
}
