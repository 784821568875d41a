//! Subscriber setup for the binaries. Library code only emits `tracing` events.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Output format of the console layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// `timestamp LEVEL target: message fields`
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Builds the filter from `RUST_LOG` if set, otherwise from `level`, with
/// the AMQP client library held at `warn`.
fn build_env_filter(level: &str) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directives = format!("{level},amqprs=warn");
    EnvFilter::try_new(&directives)
        .map_err(|e| anyhow::anyhow!("invalid tracing filter '{directives}': {e}"))
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns an error if `level` is not a valid filter directive or a global
/// subscriber is already installed.
pub fn init(format: LogFormat, level: &str) -> anyhow::Result<()> {
    let filter = build_env_filter(level)?;
    let layer = match format {
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_becomes_filter() {
        if std::env::var_os("RUST_LOG").is_none() {
            let filter = build_env_filter("debug").unwrap();
            assert!(filter.to_string().contains("amqprs=warn"));
        }
    }

    #[test]
    fn compact_is_default_format() {
        assert_eq!(LogFormat::default(), LogFormat::Compact);
    }
}
