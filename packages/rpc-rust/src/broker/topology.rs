//! Exchange and queue declarations shared by clients and workers.
//!
//! Every step here is part of startup: a failure is returned as a
//! `SetupError` and the caller aborts. Nothing is retried.

use std::sync::Arc;

use tracing::info;

use super::{BrokerError, ExchangeKind, QueueSpec, TopologyConfig};
use crate::traits::{Broker, BrokerChannel};

/// Fatal startup failure, tagged with the step that failed.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("failed to connect to broker: {0}")]
    Connect(#[source] BrokerError),
    #[error("failed to open channel: {0}")]
    Channel(#[source] BrokerError),
    #[error("failed to declare exchange '{exchange}': {source}")]
    ExchangeDeclare {
        exchange: String,
        #[source]
        source: BrokerError,
    },
    #[error("failed to declare queue: {0}")]
    QueueDeclare(#[source] BrokerError),
    #[error("failed to bind queue '{queue}' to '{exchange}' with key '{routing_key}': {source}")]
    QueueBind {
        queue: String,
        exchange: String,
        routing_key: String,
        #[source]
        source: BrokerError,
    },
    #[error("failed to start consuming '{queue}': {source}")]
    Consume {
        queue: String,
        #[source]
        source: BrokerError,
    },
    #[error("returned-message stream of this channel is already in use")]
    ReturnsTaken,
}

/// Opens the single channel used by a client or worker.
///
/// # Errors
///
/// Returns `SetupError::Channel` if the broker refuses the channel.
pub async fn open_channel(broker: &dyn Broker) -> Result<Arc<dyn BrokerChannel>, SetupError> {
    broker.open_channel().await.map_err(SetupError::Channel)
}

/// Declares the requests and responses exchanges, both direct.
///
/// Safe to call from every client and worker: redeclaration with identical
/// parameters is idempotent.
///
/// # Errors
///
/// Returns `SetupError::ExchangeDeclare` for the first declaration that fails.
pub async fn declare_topology(
    channel: &dyn BrokerChannel,
    topology: &TopologyConfig,
) -> Result<(), SetupError> {
    for exchange in [&topology.services_exchange, &topology.responses_exchange] {
        channel
            .exchange_declare(exchange, ExchangeKind::Direct)
            .await
            .map_err(|source| SetupError::ExchangeDeclare {
                exchange: exchange.clone(),
                source,
            })?;
    }
    info!(
        services = %topology.services_exchange,
        responses = %topology.responses_exchange,
        "exchanges declared"
    );
    Ok(())
}

/// Declares the durable service queue and binds it to the requests exchange
/// under `routing_key`. Returns the queue name.
///
/// # Errors
///
/// Returns `SetupError::QueueDeclare` or `SetupError::QueueBind`.
pub async fn declare_service_queue(
    channel: &dyn BrokerChannel,
    topology: &TopologyConfig,
) -> Result<String, SetupError> {
    let queue = channel
        .queue_declare(QueueSpec::Durable(topology.service_queue.clone()))
        .await
        .map_err(SetupError::QueueDeclare)?;
    channel
        .queue_bind(&queue, &topology.services_exchange, &topology.routing_key)
        .await
        .map_err(|source| SetupError::QueueBind {
            queue: queue.clone(),
            exchange: topology.services_exchange.clone(),
            routing_key: topology.routing_key.clone(),
            source,
        })?;
    info!(queue = %queue, routing_key = %topology.routing_key, "service queue bound");
    Ok(queue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;

    #[tokio::test]
    async fn declares_both_direct_exchanges() {
        let broker = MemoryBroker::new();
        let channel = open_channel(&broker).await.unwrap();
        declare_topology(channel.as_ref(), &TopologyConfig::default()).await.unwrap();

        assert_eq!(broker.exchange_kind("services"), Some(ExchangeKind::Direct));
        assert_eq!(broker.exchange_kind("responses"), Some(ExchangeKind::Direct));
    }

    #[tokio::test]
    async fn topology_is_idempotent() {
        let broker = MemoryBroker::new();
        let topology = TopologyConfig::default();
        let first = open_channel(&broker).await.unwrap();
        let second = open_channel(&broker).await.unwrap();

        declare_topology(first.as_ref(), &topology).await.unwrap();
        declare_topology(second.as_ref(), &topology).await.unwrap();
        declare_topology(first.as_ref(), &topology).await.unwrap();
        assert_eq!(broker.exchange_count(), 2);
    }

    #[tokio::test]
    async fn conflicting_exchange_is_fatal() {
        let broker = MemoryBroker::new();
        let channel = open_channel(&broker).await.unwrap();
        channel.exchange_declare("responses", ExchangeKind::Fanout).await.unwrap();

        let err = declare_topology(channel.as_ref(), &TopologyConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SetupError::ExchangeDeclare { ref exchange, source: BrokerError::PreconditionFailed(_) }
                if exchange == "responses"
        ));
    }

    #[tokio::test]
    async fn service_queue_is_bound_once() {
        let broker = MemoryBroker::new();
        let topology = TopologyConfig::default();
        let channel = open_channel(&broker).await.unwrap();
        declare_topology(channel.as_ref(), &topology).await.unwrap();

        let queue = declare_service_queue(channel.as_ref(), &topology).await.unwrap();
        declare_service_queue(channel.as_ref(), &topology).await.unwrap();
        assert_eq!(queue, "calculator_pool");
        assert_eq!(broker.binding_count("services", "calculator_pool"), 1);
    }

    #[tokio::test]
    async fn binding_without_exchange_fails() {
        let broker = MemoryBroker::new();
        let channel = open_channel(&broker).await.unwrap();
        let err = declare_service_queue(channel.as_ref(), &TopologyConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SetupError::QueueBind { .. }));
    }
}
