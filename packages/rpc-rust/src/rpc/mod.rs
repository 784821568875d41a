//! Client-side RPC: correlation registry, transport adapter and typed client.

pub mod client;
pub mod error;
pub mod pending;
pub mod transport;

pub use client::CalculatorClient;
pub use error::{FaultKind, RpcError, TransportFault};
pub use pending::{CorrelationId, PendingCalls, PendingReply};
pub use transport::{RpcTransport, TransportConfig};
