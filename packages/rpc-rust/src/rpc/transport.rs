//! Call-oriented transport over a broker channel.
//!
//! Requests go to the requests exchange under a routing key naming the
//! service queue. Each transport owns a private reply queue bound to the
//! responses exchange under a per-instance reply key; workers publish replies
//! with that key. A single pump task matches replies and broker returns to
//! pending calls by correlation id.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::{RpcError, TransportFault};
use super::pending::{CorrelationId, PendingCalls, PendingReply};
use crate::broker::{
    Delivery, OutboundMessage, QueueSpec, ReturnedMessage, SetupError, TopologyConfig,
};
use crate::traits::BrokerChannel;

/// Exchanges and default routing key of a transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Exchange requests are published to.
    pub request_exchange: String,
    /// Exchange replies arrive through.
    pub response_exchange: String,
    /// Routing key used when a call does not name its own.
    pub routing_key: String,
}

impl TransportConfig {
    /// Derives a transport configuration from the shared topology.
    #[must_use]
    pub fn from_topology(topology: &TopologyConfig) -> Self {
        Self {
            request_exchange: topology.services_exchange.clone(),
            response_exchange: topology.responses_exchange.clone(),
            routing_key: topology.routing_key.clone(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::from_topology(&TopologyConfig::default())
    }
}

/// RPC transport handle. Shared by every call issued through it.
pub struct RpcTransport {
    channel: Arc<dyn BrokerChannel>,
    config: TransportConfig,
    reply_key: String,
    reply_queue: String,
    pending: Arc<PendingCalls>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl RpcTransport {
    /// Declares and binds the private reply queue, starts consuming it and
    /// spawns the pump task. Must run inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a `SetupError` if the channel's return stream is already taken
    /// or any declaration fails.
    pub async fn setup(
        channel: Arc<dyn BrokerChannel>,
        config: TransportConfig,
    ) -> Result<Arc<Self>, SetupError> {
        let returns = channel.take_returns().ok_or(SetupError::ReturnsTaken)?;

        let reply_queue = channel
            .queue_declare(QueueSpec::ExclusiveServerNamed)
            .await
            .map_err(SetupError::QueueDeclare)?;
        let reply_key = uuid::Uuid::new_v4().to_string();
        channel
            .queue_bind(&reply_queue, &config.response_exchange, &reply_key)
            .await
            .map_err(|source| SetupError::QueueBind {
                queue: reply_queue.clone(),
                exchange: config.response_exchange.clone(),
                routing_key: reply_key.clone(),
                source,
            })?;
        let deliveries = channel
            .consume(&reply_queue)
            .await
            .map_err(|source| SetupError::Consume {
                queue: reply_queue.clone(),
                source,
            })?;

        let pending = Arc::new(PendingCalls::new());
        let pump = tokio::spawn(pump(Arc::clone(&pending), deliveries, returns));

        info!(reply_queue = %reply_queue, reply_key = %reply_key, "rpc transport ready");
        Ok(Arc::new(Self {
            channel,
            config,
            reply_key,
            reply_queue,
            pending,
            pump: Mutex::new(Some(pump)),
        }))
    }

    /// Sends a two-way request with the default routing key.
    ///
    /// # Errors
    ///
    /// See [`RpcTransport::send_to`].
    pub async fn send(&self, body: Vec<u8>) -> Result<PendingReply, RpcError> {
        self.send_to(&self.config.routing_key, body).await
    }

    /// Sends a two-way request under `routing_key`.
    ///
    /// The call is registered before the publish is issued, so a reply that
    /// races the publish acknowledgement still finds it.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Broker` if the publish fails; the registration is
    /// rolled back.
    pub async fn send_to(&self, routing_key: &str, body: Vec<u8>) -> Result<PendingReply, RpcError> {
        let (id, reply) = self.pending.register();
        let message = OutboundMessage {
            body,
            correlation_id: Some(id.to_string()),
            reply_to: Some(self.reply_key.clone()),
            mandatory: true,
        };
        if let Err(err) = self
            .channel
            .publish(&self.config.request_exchange, routing_key, message)
            .await
        {
            self.pending.cancel(id);
            return Err(err.into());
        }
        debug!(correlation_id = %id, routing_key, "request published");
        Ok(reply)
    }

    /// Publishes a one-way request under `routing_key`. Nothing is registered
    /// and nothing is ever resolved for it.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Broker` if the publish fails.
    pub async fn post_to(&self, routing_key: &str, body: Vec<u8>) -> Result<(), RpcError> {
        let message = OutboundMessage {
            body,
            correlation_id: None,
            reply_to: None,
            mandatory: true,
        };
        self.channel
            .publish(&self.config.request_exchange, routing_key, message)
            .await?;
        debug!(routing_key, "one-way request published");
        Ok(())
    }

    /// Routing key used by [`RpcTransport::send`].
    #[must_use]
    pub fn routing_key(&self) -> &str {
        &self.config.routing_key
    }

    /// Key the reply queue is bound with on the responses exchange.
    #[must_use]
    pub fn reply_key(&self) -> &str {
        &self.reply_key
    }

    /// Broker-generated name of the private reply queue.
    #[must_use]
    pub fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    /// Number of calls still waiting for a reply or a return.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.count()
    }

    /// Stops the pump. Calls still pending fail with `RpcError::Closed`.
    pub fn close(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        let abandoned = self.pending.abandon_all();
        if abandoned > 0 {
            warn!(abandoned, "transport closed with calls outstanding");
        }
    }
}

impl Drop for RpcTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn pump(
    pending: Arc<PendingCalls>,
    mut deliveries: mpsc::UnboundedReceiver<Delivery>,
    mut returns: mpsc::UnboundedReceiver<ReturnedMessage>,
) {
    let mut returns_open = true;
    loop {
        tokio::select! {
            delivery = deliveries.recv() => match delivery {
                Some(delivery) => on_delivery(&pending, delivery),
                None => break,
            },
            returned = returns.recv(), if returns_open => match returned {
                Some(returned) => on_returned(&pending, &returned),
                None => returns_open = false,
            },
        }
    }

    let abandoned = pending.abandon_all();
    if abandoned > 0 {
        warn!(abandoned, "reply stream ended with calls outstanding");
    }
}

fn parse_correlation(raw: Option<&str>) -> Option<CorrelationId> {
    raw.and_then(|id| id.parse().ok())
}

fn on_delivery(pending: &PendingCalls, delivery: Delivery) {
    let Some(id) = parse_correlation(delivery.correlation_id.as_deref()) else {
        debug!(correlation_id = ?delivery.correlation_id, "reply without usable correlation id dropped");
        return;
    };
    if !pending.resolve_reply(id, delivery.body) {
        debug!(correlation_id = %id, "stale reply dropped");
    }
}

fn on_returned(pending: &PendingCalls, returned: &ReturnedMessage) {
    let fault = TransportFault::unroutable(returned);
    let Some(id) = parse_correlation(returned.correlation_id.as_deref()) else {
        warn!(%fault, "one-way request returned by broker");
        return;
    };
    if !pending.resolve_fault(id, fault) {
        debug!(correlation_id = %id, "return for unknown call dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryChannel;
    use crate::broker::{declare_topology, ExchangeKind, MemoryBroker};

    async fn transport_on(broker: &MemoryBroker) -> Arc<RpcTransport> {
        let channel: Arc<dyn BrokerChannel> = Arc::new(broker.channel());
        declare_topology(channel.as_ref(), &TopologyConfig::default())
            .await
            .unwrap();
        RpcTransport::setup(channel, TransportConfig::default())
            .await
            .unwrap()
    }

    /// Binds a plain queue to `services` so requests have somewhere to go.
    /// The consumer lives as long as the returned channel.
    async fn service_queue(
        broker: &MemoryBroker,
    ) -> (MemoryChannel, mpsc::UnboundedReceiver<Delivery>) {
        let channel = broker.channel();
        let queue = channel
            .queue_declare(QueueSpec::Durable("calculator_pool".into()))
            .await
            .unwrap();
        channel.queue_bind(&queue, "services", "calculator").await.unwrap();
        let rx = channel.consume(&queue).await.unwrap();
        (channel, rx)
    }

    async fn reply(broker: &MemoryBroker, request: &Delivery, body: &[u8]) {
        let channel = broker.channel();
        channel
            .publish(
                "responses",
                request.reply_to.as_deref().unwrap(),
                OutboundMessage {
                    body: body.to_vec(),
                    correlation_id: request.correlation_id.clone(),
                    reply_to: None,
                    mandatory: false,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn setup_binds_private_reply_queue() {
        let broker = MemoryBroker::new();
        let transport = transport_on(&broker).await;

        assert!(broker.has_queue(transport.reply_queue()));
        assert_eq!(broker.binding_count("responses", transport.reply_queue()), 1);
        assert_eq!(transport.routing_key(), "calculator");
        assert_eq!(broker.exchange_kind("responses"), Some(ExchangeKind::Direct));
    }

    #[tokio::test]
    async fn two_transports_have_distinct_reply_keys() {
        let broker = MemoryBroker::new();
        let a = transport_on(&broker).await;
        let b = transport_on(&broker).await;
        assert_ne!(a.reply_key(), b.reply_key());
        assert_ne!(a.reply_queue(), b.reply_queue());
    }

    #[tokio::test]
    async fn request_carries_correlation_and_reply_key() {
        let broker = MemoryBroker::new();
        let transport = transport_on(&broker).await;
        let (_service, mut requests) = service_queue(&broker).await;

        let pending = transport.send(b"req".to_vec()).await.unwrap();
        let request = requests.recv().await.unwrap();
        assert_eq!(request.body, b"req");
        assert_eq!(request.reply_to.as_deref(), Some(transport.reply_key()));
        assert_eq!(request.correlation_id, Some(pending.id().to_string()));
        assert_eq!(transport.pending_count(), 1);

        reply(&broker, &request, b"rep").await;
        assert_eq!(pending.await.unwrap(), b"rep");
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test]
    async fn replies_out_of_order_reach_their_calls() {
        let broker = MemoryBroker::new();
        let transport = transport_on(&broker).await;
        let (_service, mut requests) = service_queue(&broker).await;

        let first = transport.send(b"1".to_vec()).await.unwrap();
        let second = transport.send(b"2".to_vec()).await.unwrap();
        let r1 = requests.recv().await.unwrap();
        let r2 = requests.recv().await.unwrap();

        reply(&broker, &r2, b"two").await;
        reply(&broker, &r1, b"one").await;
        assert_eq!(second.await.unwrap(), b"two");
        assert_eq!(first.await.unwrap(), b"one");
    }

    #[tokio::test]
    async fn duplicate_reply_is_dropped() {
        let broker = MemoryBroker::new();
        let transport = transport_on(&broker).await;
        let (_service, mut requests) = service_queue(&broker).await;

        let pending = transport.send(b"x".to_vec()).await.unwrap();
        let request = requests.recv().await.unwrap();
        reply(&broker, &request, b"a").await;
        reply(&broker, &request, b"b").await;
        assert_eq!(pending.await.unwrap(), b"a");

        // A later call is unaffected by the stray duplicate.
        let next = transport.send(b"y".to_vec()).await.unwrap();
        let request = requests.recv().await.unwrap();
        reply(&broker, &request, b"c").await;
        assert_eq!(next.await.unwrap(), b"c");
    }

    #[tokio::test]
    async fn unroutable_request_resolves_with_transport_fault() {
        let broker = MemoryBroker::new();
        let transport = transport_on(&broker).await;
        let _service = service_queue(&broker).await;

        let pending = transport
            .send_to("calculatorxxx", b"lost".to_vec())
            .await
            .unwrap();
        match pending.await {
            Err(RpcError::Transport(fault)) => {
                assert_eq!(fault.routing_key, "calculatorxxx");
                assert_eq!(fault.reply_code, crate::broker::NO_ROUTE);
            }
            other => panic!("expected transport fault, got {other:?}"),
        }
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test]
    async fn failed_publish_rolls_back_registration() {
        let broker = MemoryBroker::new();
        let channel: Arc<dyn BrokerChannel> = Arc::new(broker.channel());
        declare_topology(channel.as_ref(), &TopologyConfig::default())
            .await
            .unwrap();
        let config = TransportConfig {
            request_exchange: "missing".into(),
            ..TransportConfig::default()
        };
        let transport = RpcTransport::setup(channel, config).await.unwrap();

        let err = transport.send(b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, RpcError::Broker(_)));
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test]
    async fn post_registers_nothing() {
        let broker = MemoryBroker::new();
        let transport = transport_on(&broker).await;
        let (_service, mut requests) = service_queue(&broker).await;

        transport.post_to("calculator", b"zip".to_vec()).await.unwrap();
        let request = requests.recv().await.unwrap();
        assert!(request.correlation_id.is_none());
        assert!(request.reply_to.is_none());
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test]
    async fn close_fails_outstanding_calls() {
        let broker = MemoryBroker::new();
        let transport = transport_on(&broker).await;
        let _service = service_queue(&broker).await;

        let pending = transport.send(b"x".to_vec()).await.unwrap();
        transport.close();
        assert!(matches!(pending.await, Err(RpcError::Closed)));
    }

    #[tokio::test]
    async fn second_transport_on_same_channel_is_refused() {
        let broker = MemoryBroker::new();
        let channel: Arc<dyn BrokerChannel> = Arc::new(broker.channel());
        declare_topology(channel.as_ref(), &TopologyConfig::default())
            .await
            .unwrap();
        let _first = RpcTransport::setup(Arc::clone(&channel), TransportConfig::default())
            .await
            .unwrap();
        let second = RpcTransport::setup(channel, TransportConfig::default()).await;
        assert!(matches!(second, Err(SetupError::ReturnsTaken)));
    }
}
