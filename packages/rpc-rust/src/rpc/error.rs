//! Per-call error taxonomy.

use amqrpc_core::{ApplicationException, CodecError, ServiceFault};

use crate::broker::{BrokerError, ReturnedMessage};

/// The broker could not route a request to any queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportFault {
    /// Human-readable diagnostic.
    pub message: String,
    pub reply_code: u16,
    pub exchange: String,
    pub routing_key: String,
}

impl TransportFault {
    /// Builds the fault reported for a returned (unroutable) request.
    #[must_use]
    pub fn unroutable(returned: &ReturnedMessage) -> Self {
        Self {
            message: format!(
                "unroutable message: {} {} (exchange = '{}', routing key = '{}')",
                returned.reply_code, returned.reply_text, returned.exchange, returned.routing_key
            ),
            reply_code: returned.reply_code,
            exchange: returned.exchange.clone(),
            routing_key: returned.routing_key.clone(),
        }
    }
}

/// Fault kinds a caller can trap explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Declared domain exception returned by the service.
    Application,
    /// Request rejected by the broker as unroutable.
    Transport,
}

/// Why a call did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The service raised a declared exception.
    #[error("application fault: {0}")]
    Application(ServiceFault),
    /// The broker returned the request as unroutable.
    #[error("transport fault: {0}")]
    Transport(TransportFault),
    /// The service could not process the request frame.
    #[error("remote exception: {0}")]
    Remote(ApplicationException),
    /// The reply did not match the request.
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// Publishing the request failed.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
    /// The transport shut down before the call resolved.
    #[error("transport closed before the call completed")]
    Closed,
}

impl RpcError {
    /// The trappable kind of this error, if it has one.
    #[must_use]
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            Self::Application(_) => Some(FaultKind::Application),
            Self::Transport(_) => Some(FaultKind::Transport),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use amqrpc_core::InvalidOperation;

    use super::*;

    #[test]
    fn unroutable_fault_describes_the_route() {
        let returned = ReturnedMessage {
            reply_code: 312,
            reply_text: "NO_ROUTE".into(),
            exchange: "services".into(),
            routing_key: "calculatorxxx".into(),
            correlation_id: Some("1".into()),
            body: Vec::new(),
        };
        let fault = TransportFault::unroutable(&returned);
        assert_eq!(fault.reply_code, 312);
        assert_eq!(fault.routing_key, "calculatorxxx");
        assert_eq!(
            fault.to_string(),
            "unroutable message: 312 NO_ROUTE (exchange = 'services', routing key = 'calculatorxxx')"
        );
    }

    #[test]
    fn only_application_and_transport_are_trappable() {
        let app = RpcError::Application(InvalidOperation::new(4, "Cannot divide by 0").into());
        assert_eq!(app.fault_kind(), Some(FaultKind::Application));
        assert_eq!(RpcError::Closed.fault_kind(), None);
        assert_eq!(RpcError::Protocol("x".into()).fault_kind(), None);
    }
}
