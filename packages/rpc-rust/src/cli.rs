//! Command-line options shared by the binaries.

use clap::{Args, ValueEnum};

use crate::logging::LogFormat;

/// Frame codec selectable on the command line. Client and worker must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CodecChoice {
    /// Named `MessagePack`.
    #[default]
    Msgpack,
    Json,
}

/// Options every binary accepts.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Routing key binding the service queue to the requests exchange.
    #[arg(long, default_value = "calculator", env = "AMQRPC_ROUTING_KEY")]
    pub routing_key: String,

    /// Frame codec.
    #[arg(long, value_enum, default_value_t = CodecChoice::Msgpack)]
    pub codec: CodecChoice,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    /// Log level or filter directives; `RUST_LOG` takes precedence.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
