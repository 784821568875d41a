//! Calculator service: consumes the service queue, evaluates requests and
//! publishes replies to the responses exchange.

use std::sync::Arc;

use amqrpc_core::processor::process;
use amqrpc_core::{Calculator, Codec, MsgPackCodec};
use anyhow::Context as _;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::config::WorkerConfig;
use super::worker::{BackgroundRunnable, BackgroundWorker};
use crate::broker::{declare_service_queue, declare_topology, Delivery, OutboundMessage, SetupError};
use crate::traits::BrokerChannel;

/// Counters reported on every stats tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    /// Requests taken off the queue.
    pub received: u64,
    /// Replies published.
    pub replied: u64,
    /// Requests that need no reply (one-way, or unreadable).
    pub silent: u64,
    /// Requests whose reply could not be produced or published.
    pub failed: u64,
}

/// Runnable that answers one request per task.
pub struct CalculatorWorker<C: Codec = MsgPackCodec> {
    handler: Arc<dyn Calculator>,
    codec: C,
    channel: Arc<dyn BrokerChannel>,
    responses_exchange: String,
    stats: WorkerStats,
    stats_tx: watch::Sender<WorkerStats>,
}

impl<C: Codec> CalculatorWorker<C> {
    #[must_use]
    pub fn new(
        handler: Arc<dyn Calculator>,
        codec: C,
        channel: Arc<dyn BrokerChannel>,
        responses_exchange: impl Into<String>,
    ) -> Self {
        let (stats_tx, _) = watch::channel(WorkerStats::default());
        Self {
            handler,
            codec,
            channel,
            responses_exchange: responses_exchange.into(),
            stats: WorkerStats::default(),
            stats_tx,
        }
    }

    /// Live view of the counters, updated after every task.
    #[must_use]
    pub fn stats(&self) -> watch::Receiver<WorkerStats> {
        self.stats_tx.subscribe()
    }

    /// Returns whether a reply was published.
    async fn answer(&self, delivery: Delivery) -> anyhow::Result<bool> {
        let reply = process(self.handler.as_ref(), &self.codec, &delivery.body)
            .await
            .context("encoding reply")?;
        let Some(body) = reply else {
            return Ok(false);
        };
        let Some(reply_to) = delivery.reply_to else {
            warn!(correlation_id = ?delivery.correlation_id, "two-way request without reply_to; reply dropped");
            return Ok(false);
        };

        let message = OutboundMessage {
            body,
            correlation_id: delivery.correlation_id,
            reply_to: None,
            mandatory: false,
        };
        self.channel
            .publish(&self.responses_exchange, &reply_to, message)
            .await
            .with_context(|| format!("publishing reply to '{reply_to}'"))?;
        debug!(reply_to = %reply_to, "reply published");
        Ok(true)
    }
}

#[async_trait]
impl<C: Codec> BackgroundRunnable for CalculatorWorker<C> {
    type Task = Delivery;

    async fn run(&mut self, delivery: Delivery) {
        self.stats.received += 1;
        match self.answer(delivery).await {
            Ok(true) => self.stats.replied += 1,
            Ok(false) => self.stats.silent += 1,
            Err(err) => {
                self.stats.failed += 1;
                warn!(error = ?err, "request failed");
            }
        }
        self.stats_tx.send_replace(self.stats);
    }

    async fn on_tick(&mut self) {
        let WorkerStats {
            received,
            replied,
            silent,
            failed,
        } = self.stats;
        info!(received, replied, silent, failed, "worker stats");
    }

    async fn shutdown(&mut self) {
        info!(received = self.stats.received, "calculator worker stopped");
    }
}

/// A calculator worker bound to the service queue.
pub struct CalculatorService<C: Codec = MsgPackCodec> {
    queue: String,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    worker: BackgroundWorker<CalculatorWorker<C>>,
    stats: watch::Receiver<WorkerStats>,
}

impl<C: Codec> CalculatorService<C> {
    /// Declares the topology and the service queue, starts consuming it and
    /// spawns the worker. Must run inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a `SetupError` for the first declaration that fails.
    pub async fn start(
        channel: Arc<dyn BrokerChannel>,
        handler: Arc<dyn Calculator>,
        codec: C,
        config: &WorkerConfig,
    ) -> Result<Self, SetupError> {
        declare_topology(channel.as_ref(), &config.topology).await?;
        let queue = declare_service_queue(channel.as_ref(), &config.topology).await?;
        let deliveries = channel
            .consume(&queue)
            .await
            .map_err(|source| SetupError::Consume {
                queue: queue.clone(),
                source,
            })?;

        let runnable = CalculatorWorker::new(
            handler,
            codec,
            channel,
            config.topology.responses_exchange.clone(),
        );
        let stats = runnable.stats();
        let worker = BackgroundWorker::start(
            runnable,
            config.stats_interval_ms,
            config.task_channel_capacity,
        );

        info!(queue = %queue, "calculator service started");
        Ok(Self {
            queue,
            deliveries,
            worker,
            stats,
        })
    }

    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    #[must_use]
    pub fn stats(&self) -> watch::Receiver<WorkerStats> {
        self.stats.clone()
    }

    /// Feeds consumed requests to the worker until `stop` turns `true`, its
    /// sender goes away, or the consumer ends. Then stops the worker after it
    /// drains what it already accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker stopped accepting tasks.
    pub async fn serve(mut self, mut stop: watch::Receiver<bool>) -> anyhow::Result<()> {
        let result = self.feed(&mut stop).await;
        self.worker.stop().await;
        result
    }

    async fn feed(&mut self, stop: &mut watch::Receiver<bool>) -> anyhow::Result<()> {
        if *stop.borrow_and_update() {
            return Ok(());
        }
        loop {
            tokio::select! {
                delivery = self.deliveries.recv() => match delivery {
                    Some(delivery) => self.worker.submit(delivery).await?,
                    None => {
                        warn!(queue = %self.queue, "service queue consumer closed");
                        return Ok(());
                    }
                },
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow_and_update() {
                        info!("stop requested");
                        return Ok(());
                    }
                }
            }
        }
    }
}
