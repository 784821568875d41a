//! Issues the demonstration batch against a calculator worker and exits once
//! every call has settled.
//!
//! ```text
//! calculator-client localhost 5672 / guest guest amqp0-9-1.xml
//! calculator-client localhost 5672 / guest guest amqp0-9-1.xml --routing-key calculatorxxx
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use amqrpc::broker::{declare_topology, open_channel, AmqpBroker};
use amqrpc::cli::{CodecChoice, CommonArgs};
use amqrpc::{
    default_batch, logging, run_until_settled, Broker, BrokerConfig, CalculatorClient, RpcTransport,
    SetupError, ShutdownController, TopologyConfig, TransportConfig,
};
use amqrpc_core::{Codec, JsonCodec, MsgPackCodec};
use clap::Parser;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "calculator-client", about = "Calculator RPC client over AMQP exchanges")]
struct Cli {
    /// Broker host.
    host: String,
    /// Broker AMQP port.
    port: u16,
    /// Virtual host.
    vhost: String,
    username: String,
    password: String,
    /// AMQP protocol definition file. The protocol is built in; the path is
    /// only checked for existence.
    spec_path: PathBuf,

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

    fn topology(&self) -> TopologyConfig {
        TopologyConfig {
            routing_key: self.common.routing_key.clone(),
            ..TopologyConfig::default()
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.common.log_format, &cli.common.log_level)?;

    let path = &cli.spec_path;
    if !path.exists() {
        anyhow::bail!("protocol definition '{}' not found", path.display());
    }
    info!(path = %path.display(), "ignoring protocol definition; AMQP 0-9-1 is built in");

    match cli.common.codec {
        CodecChoice::Msgpack => run(&cli, MsgPackCodec).await,
        CodecChoice::Json => run(&cli, JsonCodec).await,
    }
}

async fn run<C: Codec>(cli: &Cli, codec: C) -> anyhow::Result<()> {
    let topology = cli.topology();
    let broker = AmqpBroker::connect(&cli.broker_config())
        .await
        .map_err(SetupError::Connect)?;
    let channel = open_channel(&broker).await?;
    declare_topology(channel.as_ref(), &topology).await?;
    let transport =
        RpcTransport::setup(Arc::clone(&channel), TransportConfig::from_topology(&topology)).await?;
    let client = CalculatorClient::new(Arc::clone(&transport), codec);

    let shutdown = ShutdownController::new();
    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let plans = default_batch(&topology.routing_key);
    if let Some(report) = run_until_settled(&client, plans, &shutdown, interrupt).await {
        info!(calls = report.len(), unhandled = report.unhandled(), "batch complete");
    }

    transport.close();
    if let Err(err) = channel.close().await {
        warn!(error = %err, "channel close failed");
    }
    broker.close().await?;
    shutdown.mark_stopped();
    info!("disconnected");
    Ok(())
}
