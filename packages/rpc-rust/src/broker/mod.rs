//! Broker backends, message types and topology declaration.

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod config;
pub mod memory;
pub mod topology;

#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;
pub use config::{BrokerConfig, TopologyConfig};
pub use memory::MemoryBroker;
pub use topology::{declare_service_queue, declare_topology, open_channel, SetupError};

/// AMQP reply code the broker uses for mandatory messages without a route.
pub const NO_ROUTE: u16 = 312;

/// Routing semantics of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Route to queues whose binding key equals the routing key.
    Direct,
    /// Route to every bound queue regardless of key.
    Fanout,
}

impl ExchangeKind {
    /// AMQP type name of the exchange.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Fanout => "fanout",
        }
    }
}

/// Queue declaration variants used by this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueSpec {
    /// A durable queue with a well-known name, shared by workers.
    Durable(String),
    /// A private, exclusive queue whose name the broker generates.
    ExclusiveServerNamed,
}

/// A message handed to the broker for publishing.
#[derive(Debug, Clone, Default)]
pub struct OutboundMessage {
    pub body: Vec<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    /// Ask the broker to return the message if no queue matches.
    pub mandatory: bool,
}

/// A message consumed from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub body: Vec<u8>,
}

/// A mandatory message the broker could not route, sent back to its publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnedMessage {
    pub reply_code: u16,
    pub reply_text: String,
    pub exchange: String,
    pub routing_key: String,
    pub correlation_id: Option<String>,
    pub body: Vec<u8>,
}

/// Errors raised by broker backends.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("channel is closed")]
    ChannelClosed,
    #[error("no {kind} named '{name}'")]
    NotFound { kind: &'static str, name: String },
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("broker protocol error: {0}")]
    Protocol(String),
}
