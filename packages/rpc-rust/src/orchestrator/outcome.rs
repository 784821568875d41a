//! Settling call results into outcomes, and the aggregate report.

use std::fmt;

use amqrpc_core::{ReturnValue, ServiceFault};
use tracing::{error, info, warn};

use crate::rpc::{FaultKind, RpcError, TransportFault};

/// Terminal state of one call in a batch.
#[derive(Debug)]
pub enum CallOutcome {
    Succeeded(ReturnValue),
    /// A trapped application fault.
    ApplicationFailed(ServiceFault),
    /// A trapped transport fault.
    TransportFailed(TransportFault),
    /// An error no handler of the call traps.
    Unhandled(RpcError),
}

impl CallOutcome {
    /// Whether a handler took care of this outcome.
    #[must_use]
    pub fn is_handled(&self) -> bool {
        !matches!(self, Self::Unhandled(_))
    }

    #[must_use]
    pub fn value(&self) -> Option<ReturnValue> {
        match self {
            Self::Succeeded(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded(ReturnValue::Void) => f.write_str("ok"),
            Self::Succeeded(ReturnValue::I32(v)) => write!(f, "ok: {v}"),
            Self::ApplicationFailed(fault) => write!(f, "application fault: {fault}"),
            Self::TransportFailed(fault) => write!(f, "transport fault: {fault}"),
            Self::Unhandled(err) => write!(f, "unhandled: {err}"),
        }
    }
}

/// Maps a call result to its outcome.
///
/// A fault becomes a handled outcome only if its kind is in `traps`; every
/// other error is kept as `Unhandled`.
#[must_use]
pub fn settle(result: Result<ReturnValue, RpcError>, traps: &[FaultKind]) -> CallOutcome {
    match result {
        Ok(value) => CallOutcome::Succeeded(value),
        Err(RpcError::Application(fault)) if traps.contains(&FaultKind::Application) => {
            CallOutcome::ApplicationFailed(fault)
        }
        Err(RpcError::Transport(fault)) if traps.contains(&FaultKind::Transport) => {
            CallOutcome::TransportFailed(fault)
        }
        Err(err) => CallOutcome::Unhandled(err),
    }
}

/// Logs an outcome the way its handler reports it.
pub fn log_outcome(label: &str, outcome: &CallOutcome) {
    match outcome {
        CallOutcome::Succeeded(ReturnValue::Void) => info!(call = label, "succeeded"),
        CallOutcome::Succeeded(ReturnValue::I32(value)) => info!(call = label, value, "succeeded"),
        CallOutcome::ApplicationFailed(fault) => warn!(call = label, %fault, "application fault"),
        CallOutcome::TransportFailed(fault) => warn!(call = label, %fault, "transport fault"),
        CallOutcome::Unhandled(err) => error!(call = label, error = %err, "unhandled call failure"),
    }
}

/// Outcome of one call, tagged with its label.
#[derive(Debug)]
pub struct CallResult {
    pub label: String,
    pub outcome: CallOutcome,
}

/// Every outcome of a batch, in plan order.
#[derive(Debug, Default)]
pub struct BatchReport {
    results: Vec<CallResult>,
}

impl BatchReport {
    #[must_use]
    pub fn new(results: Vec<CallResult>) -> Self {
        Self { results }
    }

    #[must_use]
    pub fn results(&self) -> &[CallResult] {
        &self.results
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// First outcome whose label equals `label`.
    #[must_use]
    pub fn outcome(&self, label: &str) -> Option<&CallOutcome> {
        self.results
            .iter()
            .find(|r| r.label == label)
            .map(|r| &r.outcome)
    }

    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, CallOutcome::Succeeded(_)))
    }

    #[must_use]
    pub fn application_failed(&self) -> usize {
        self.count(|o| matches!(o, CallOutcome::ApplicationFailed(_)))
    }

    #[must_use]
    pub fn transport_failed(&self) -> usize {
        self.count(|o| matches!(o, CallOutcome::TransportFailed(_)))
    }

    #[must_use]
    pub fn unhandled(&self) -> usize {
        self.count(|o| !o.is_handled())
    }

    fn count(&self, pred: impl Fn(&CallOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn log_summary(&self) {
        info!(
            calls = self.len(),
            succeeded = self.succeeded(),
            application_failed = self.application_failed(),
            transport_failed = self.transport_failed(),
            unhandled = self.unhandled(),
            "all calls settled"
        );
    }
}
