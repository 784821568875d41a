//! AMQP 0-9-1 backend built on `amqprs`.

use std::sync::Arc;

use amqprs::callbacks::{ChannelCallback, DefaultConnectionCallback};
use amqprs::channel::{
    BasicConsumeArguments, BasicPublishArguments, Channel, ExchangeDeclareArguments,
    QueueBindArguments, QueueDeclareArguments,
};
use amqprs::connection::{Connection, OpenConnectionArguments};
use amqprs::{Ack, BasicProperties, Cancel, CloseChannel, Nack, Return};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    BrokerConfig, BrokerError, Delivery, ExchangeKind, OutboundMessage, QueueSpec, ReturnedMessage,
};
use crate::traits::{Broker, BrokerChannel};

impl From<amqprs::error::Error> for BrokerError {
    fn from(err: amqprs::error::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// An authenticated AMQP connection.
pub struct AmqpBroker {
    connection: Connection,
}

impl AmqpBroker {
    /// Connects and authenticates against `config.vhost`.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Connection` if the TCP connection, the AMQP
    /// handshake or authentication fails.
    pub async fn connect(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let mut args = OpenConnectionArguments::new(
            &config.host,
            config.port,
            &config.username,
            &config.password,
        );
        args.virtual_host(&config.vhost);

        let connection = Connection::open(&args)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        connection
            .register_callback(DefaultConnectionCallback)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        info!(host = %config.host, port = config.port, vhost = %config.vhost, "connected to broker");
        Ok(Self { connection })
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let channel = self.connection.open_channel(None).await?;
        let (returns_tx, returns_rx) = mpsc::unbounded_channel();
        channel
            .register_callback(ReturnForwarder { returns: returns_tx })
            .await?;
        Ok(Arc::new(AmqpChannel {
            channel,
            returns: Mutex::new(Some(returns_rx)),
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.connection.clone().close().await?;
        Ok(())
    }
}

/// Channel callback that forwards `basic.return` frames to the channel's
/// returned-message stream.
struct ReturnForwarder {
    returns: mpsc::UnboundedSender<ReturnedMessage>,
}

#[async_trait]
impl ChannelCallback for ReturnForwarder {
    async fn close(
        &mut self,
        channel: &Channel,
        close: CloseChannel,
    ) -> Result<(), amqprs::error::Error> {
        warn!(channel_id = channel.channel_id(), ?close, "channel closed by broker");
        Ok(())
    }

    async fn cancel(&mut self, _channel: &Channel, cancel: Cancel) -> Result<(), amqprs::error::Error> {
        warn!(?cancel, "consumer cancelled by broker");
        Ok(())
    }

    async fn flow(&mut self, _channel: &Channel, active: bool) -> Result<bool, amqprs::error::Error> {
        debug!(active, "channel flow");
        Ok(active)
    }

    async fn publish_ack(&mut self, _channel: &Channel, _ack: Ack) {}

    async fn publish_nack(&mut self, _channel: &Channel, _nack: Nack) {}

    async fn publish_return(
        &mut self,
        _channel: &Channel,
        ret: Return,
        basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let returned = ReturnedMessage {
            reply_code: ret.reply_code(),
            reply_text: ret.reply_text().to_string(),
            exchange: ret.exchange().to_string(),
            routing_key: ret.routing_key().to_string(),
            correlation_id: basic_properties.correlation_id().cloned(),
            body: content,
        };
        if self.returns.send(returned).is_err() {
            debug!("returned message dropped: no listener");
        }
    }
}

/// A channel on an [`AmqpBroker`].
pub struct AmqpChannel {
    channel: Channel,
    returns: Mutex<Option<mpsc::UnboundedReceiver<ReturnedMessage>>>,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn exchange_declare(&self, exchange: &str, kind: ExchangeKind) -> Result<(), BrokerError> {
        self.channel
            .exchange_declare(ExchangeDeclareArguments::new(exchange, kind.as_str()))
            .await?;
        Ok(())
    }

    async fn queue_declare(&self, queue: QueueSpec) -> Result<String, BrokerError> {
        let args = match &queue {
            QueueSpec::Durable(name) => QueueDeclareArguments::durable_client_named(name),
            QueueSpec::ExclusiveServerNamed => QueueDeclareArguments::exclusive_server_named(),
        };
        match self.channel.queue_declare(args).await? {
            Some((name, _message_count, _consumer_count)) => Ok(name),
            None => Err(BrokerError::Protocol(format!(
                "queue.declare-ok missing for {queue:?}"
            ))),
        }
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.channel
            .queue_bind(QueueBindArguments::new(queue, exchange, routing_key))
            .await?;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<mpsc::UnboundedReceiver<Delivery>, BrokerError> {
        let mut args = BasicConsumeArguments::new(queue, "");
        args.no_ack = true;
        let (consumer_tag, mut messages) = self.channel.basic_consume_rx(args).await?;
        debug!(queue, consumer_tag = %consumer_tag, "consuming");

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                let (Some(deliver), Some(properties), Some(body)) =
                    (message.deliver, message.basic_properties, message.content)
                else {
                    continue;
                };
                let delivery = Delivery {
                    exchange: deliver.exchange().to_string(),
                    routing_key: deliver.routing_key().to_string(),
                    correlation_id: properties.correlation_id().cloned(),
                    reply_to: properties.reply_to().cloned(),
                    body,
                };
                if tx.send(delivery).is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    fn take_returns(&self) -> Option<mpsc::UnboundedReceiver<ReturnedMessage>> {
        self.returns.lock().take()
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), BrokerError> {
        let mut properties = BasicProperties::default();
        if let Some(id) = &message.correlation_id {
            properties.with_correlation_id(id);
        }
        if let Some(reply_to) = &message.reply_to {
            properties.with_reply_to(reply_to);
        }
        let mut args = BasicPublishArguments::new(exchange, routing_key);
        args.mandatory = message.mandatory;

        self.channel
            .basic_publish(properties, message.body, args)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.channel.clone().close().await?;
        Ok(())
    }
}
