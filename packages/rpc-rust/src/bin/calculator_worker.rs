//! Serves the calculator on the shared service queue until interrupted.

use std::sync::Arc;

use amqrpc::broker::{open_channel, AmqpBroker};
use amqrpc::cli::{CodecChoice, CommonArgs};
use amqrpc::{logging, Broker, BrokerConfig, CalculatorService, SetupError, WorkerConfig};
use amqrpc_core::{CalculatorHandler, Codec, JsonCodec, MsgPackCodec};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "calculator-worker", about = "Calculator RPC worker over AMQP exchanges")]
struct Cli {
    #[arg(long, default_value = "localhost", env = "AMQRPC_HOST")]
    host: String,

    #[arg(long, default_value_t = 5672, env = "AMQRPC_PORT")]
    port: u16,

    #[arg(long, default_value = "/", env = "AMQRPC_VHOST")]
    vhost: String,

    #[arg(long, default_value = "guest", env = "AMQRPC_USERNAME")]
    username: String,

    #[arg(long, default_value = "guest", env = "AMQRPC_PASSWORD")]
    password: String,

    /// Durable queue shared by all workers.
    #[arg(long, default_value = "calculator_pool")]
    queue: String,

    #[command(flatten)]
    common: CommonArgs,
}

impl Cli {
    fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            host: self.host.clone(),
            port: self.port,
            vhost: self.vhost.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    fn worker_config(&self) -> WorkerConfig {
        let mut config = WorkerConfig::default();
        config.topology.service_queue.clone_from(&self.queue);
        config.topology.routing_key.clone_from(&self.common.routing_key);
        config
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.common.log_format, &cli.common.log_level)?;

    match cli.common.codec {
        CodecChoice::Msgpack => run(&cli, MsgPackCodec).await,
        CodecChoice::Json => run(&cli, JsonCodec).await,
    }
}

async fn run<C: Codec>(cli: &Cli, codec: C) -> anyhow::Result<()> {
    let codec_name = codec.name();
    let broker = AmqpBroker::connect(&cli.broker_config())
        .await
        .map_err(SetupError::Connect)?;
    let channel = open_channel(&broker).await?;
    let service = CalculatorService::start(
        Arc::clone(&channel),
        Arc::new(CalculatorHandler::new()),
        codec,
        &cli.worker_config(),
    )
    .await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, stopping");
                let _ = stop_tx.send(true);
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for interrupts");
                // Dropping the sender would stop the service.
                std::future::pending::<()>().await;
            }
        }
    });

    info!(queue = service.queue(), codec = codec_name, "waiting for requests");
    service.serve(stop_rx).await?;

    if let Err(err) = channel.close().await {
        warn!(error = %err, "channel close failed");
    }
    broker.close().await?;
    Ok(())
}
