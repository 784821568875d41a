//! `amqrpc`: calculator RPC over AMQP exchanges.
//!
//! Requests go to a direct `services` exchange and are routed to a shared
//! service queue; replies come back through a direct `responses` exchange to
//! a private queue per client, matched to their calls by correlation id.

pub mod broker;
pub mod cli;
pub mod logging;
pub mod orchestrator;
pub mod rpc;
pub mod service;
pub mod traits;

pub use broker::{BrokerConfig, MemoryBroker, SetupError, TopologyConfig};
pub use orchestrator::{default_batch, run_batch, run_until_settled, BatchReport, CallOutcome, CallPlan, ShutdownController};
pub use rpc::{CalculatorClient, FaultKind, RpcError, RpcTransport, TransportConfig, TransportFault};
pub use service::{CalculatorService, WorkerConfig};
pub use traits::{Broker, BrokerChannel};
