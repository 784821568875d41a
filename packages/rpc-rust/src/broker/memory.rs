//! In-process broker with AMQP routing semantics.
//!
//! Models exactly what the RPC layer relies on: direct and fanout exchanges,
//! durable and exclusive server-named queues, bindings, one consumer per
//! queue, and mandatory publishes that come back to the publishing channel
//! when nothing matches. Channel-level errors (unknown exchange, conflicting
//! redeclaration) close the channel, as an AMQP broker would.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    BrokerError, Delivery, ExchangeKind, OutboundMessage, QueueSpec, ReturnedMessage, NO_ROUTE,
};
use crate::traits::{Broker, BrokerChannel};

type ChannelId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    exchange: String,
    queue: String,
    routing_key: String,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Channel that owns an exclusive queue.
    owner: Option<ChannelId>,
    backlog: VecDeque<Delivery>,
    consumer: Option<(ChannelId, mpsc::UnboundedSender<Delivery>)>,
}

impl QueueState {
    fn push(&mut self, delivery: Delivery) {
        if let Some((_, tx)) = &self.consumer {
            match tx.send(delivery) {
                Ok(()) => return,
                Err(mpsc::error::SendError(delivery)) => {
                    // Consumer went away without cancelling.
                    self.consumer = None;
                    self.backlog.push_back(delivery);
                    return;
                }
            }
        }
        self.backlog.push_back(delivery);
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeKind>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<Binding>,
}

impl BrokerState {
    fn route(&self, exchange: &str, kind: ExchangeKind, routing_key: &str) -> Vec<String> {
        let mut targets: Vec<String> = Vec::new();
        for binding in self.bindings.iter().filter(|b| b.exchange == exchange) {
            let matches = match kind {
                ExchangeKind::Direct => binding.routing_key == routing_key,
                ExchangeKind::Fanout => true,
            };
            if matches && !targets.contains(&binding.queue) {
                targets.push(binding.queue.clone());
            }
        }
        targets
    }

    /// Drops everything a closing channel owns: exclusive queues, their
    /// bindings, and its consumers on shared queues.
    fn release_channel(&mut self, channel: ChannelId) {
        let owned: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, q)| q.owner == Some(channel))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &owned {
            self.queues.remove(name);
        }
        self.bindings.retain(|b| !owned.contains(&b.queue));

        for queue in self.queues.values_mut() {
            if matches!(queue.consumer, Some((id, _)) if id == channel) {
                queue.consumer = None;
            }
        }
    }
}

/// Shared in-process broker. Cloning yields another handle to the same broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    next_channel: Arc<AtomicU64>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Kind of a declared exchange.
    #[must_use]
    pub fn exchange_kind(&self, name: &str) -> Option<ExchangeKind> {
        self.state.lock().exchanges.get(name).copied()
    }

    /// Number of declared exchanges.
    #[must_use]
    pub fn exchange_count(&self) -> usize {
        self.state.lock().exchanges.len()
    }

    /// Whether a queue with this name exists.
    #[must_use]
    pub fn has_queue(&self, name: &str) -> bool {
        self.state.lock().queues.contains_key(name)
    }

    /// Messages waiting in a queue for a consumer.
    #[must_use]
    pub fn queue_depth(&self, name: &str) -> Option<usize> {
        self.state.lock().queues.get(name).map(|q| q.backlog.len())
    }

    /// Number of bindings from `exchange` to `queue`.
    #[must_use]
    pub fn binding_count(&self, exchange: &str, queue: &str) -> usize {
        self.state
            .lock()
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && b.queue == queue)
            .count()
    }

    /// Opens a channel with its concrete type, for tests that need it.
    #[must_use]
    pub fn channel(&self) -> MemoryChannel {
        let (returns_tx, returns_rx) = mpsc::unbounded_channel();
        MemoryChannel {
            id: self.next_channel.fetch_add(1, Ordering::Relaxed) + 1,
            state: Arc::clone(&self.state),
            open: AtomicBool::new(true),
            returns_tx,
            returns_rx: Mutex::new(Some(returns_rx)),
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        Ok(Arc::new(self.channel()))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// A channel on a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryChannel {
    id: ChannelId,
    state: Arc<Mutex<BrokerState>>,
    open: AtomicBool,
    returns_tx: mpsc::UnboundedSender<ReturnedMessage>,
    returns_rx: Mutex<Option<mpsc::UnboundedReceiver<ReturnedMessage>>>,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BrokerError::ChannelClosed)
        }
    }

    /// Closes the channel because of a channel-level error and returns it.
    fn fail(&self, state: &mut BrokerState, err: BrokerError) -> BrokerError {
        self.open.store(false, Ordering::Release);
        state.release_channel(self.id);
        debug!(channel = self.id, error = %err, "memory channel closed by error");
        err
    }

    /// Whether the channel is still usable.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn exchange_declare(&self, exchange: &str, kind: ExchangeKind) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        match state.exchanges.get(exchange).copied() {
            Some(existing) if existing == kind => Ok(()),
            Some(existing) => {
                let err = BrokerError::PreconditionFailed(format!(
                    "exchange '{exchange}' already declared as {}, not {}",
                    existing.as_str(),
                    kind.as_str()
                ));
                Err(self.fail(&mut state, err))
            }
            None => {
                state.exchanges.insert(exchange.to_string(), kind);
                Ok(())
            }
        }
    }

    async fn queue_declare(&self, queue: QueueSpec) -> Result<String, BrokerError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        match queue {
            QueueSpec::Durable(name) => {
                if let Some(existing) = state.queues.get(&name) {
                    if existing.owner.is_some_and(|owner| owner != self.id) {
                        let err = BrokerError::PreconditionFailed(format!(
                            "queue '{name}' is exclusive to another channel"
                        ));
                        return Err(self.fail(&mut state, err));
                    }
                } else {
                    state.queues.insert(name.clone(), QueueState::default());
                }
                Ok(name)
            }
            QueueSpec::ExclusiveServerNamed => {
                let name = format!("amq.gen-{}", uuid::Uuid::new_v4().simple());
                state.queues.insert(
                    name.clone(),
                    QueueState {
                        owner: Some(self.id),
                        ..QueueState::default()
                    },
                );
                Ok(name)
            }
        }
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        if !state.exchanges.contains_key(exchange) {
            let err = BrokerError::NotFound {
                kind: "exchange",
                name: exchange.to_string(),
            };
            return Err(self.fail(&mut state, err));
        }
        if !state.queues.contains_key(queue) {
            let err = BrokerError::NotFound {
                kind: "queue",
                name: queue.to_string(),
            };
            return Err(self.fail(&mut state, err));
        }
        let binding = Binding {
            exchange: exchange.to_string(),
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
        };
        if !state.bindings.contains(&binding) {
            state.bindings.push(binding);
        }
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<mpsc::UnboundedReceiver<Delivery>, BrokerError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        let Some(entry) = state.queues.get_mut(queue) else {
            let err = BrokerError::NotFound {
                kind: "queue",
                name: queue.to_string(),
            };
            return Err(self.fail(&mut state, err));
        };
        if entry.consumer.as_ref().is_some_and(|(_, tx)| !tx.is_closed()) {
            let err = BrokerError::PreconditionFailed(format!("queue '{queue}' already has a consumer"));
            return Err(self.fail(&mut state, err));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for delivery in entry.backlog.drain(..) {
            // The receiver is still in scope, so this cannot fail.
            let _ = tx.send(delivery);
        }
        entry.consumer = Some((self.id, tx));
        Ok(rx)
    }

    fn take_returns(&self) -> Option<mpsc::UnboundedReceiver<ReturnedMessage>> {
        self.returns_rx.lock().take()
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        let Some(kind) = state.exchanges.get(exchange).copied() else {
            let err = BrokerError::NotFound {
                kind: "exchange",
                name: exchange.to_string(),
            };
            return Err(self.fail(&mut state, err));
        };

        let targets = state.route(exchange, kind, routing_key);
        if targets.is_empty() {
            if message.mandatory {
                // Publisher may have dropped its return stream; nothing to report then.
                let _ = self.returns_tx.send(ReturnedMessage {
                    reply_code: NO_ROUTE,
                    reply_text: "NO_ROUTE".to_string(),
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    correlation_id: message.correlation_id,
                    body: message.body,
                });
            }
            return Ok(());
        }

        for target in targets {
            if let Some(queue) = state.queues.get_mut(&target) {
                queue.push(Delivery {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    correlation_id: message.correlation_id.clone(),
                    reply_to: message.reply_to.clone(),
                    body: message.body.clone(),
                });
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.open.swap(false, Ordering::AcqRel) {
            self.state.lock().release_channel(self.id);
        }
        Ok(())
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.state.lock().release_channel(self.id);
        }
    }
}
