//! Concurrent batch of calls with per-call fault traps.

use std::future::Future;

use amqrpc_core::{Codec, Operation, ReturnValue, ServiceCall, Work};
use futures_util::future::join_all;
use tracing::{info, warn};

use super::outcome::{log_outcome, settle, BatchReport, CallResult};
use super::shutdown::ShutdownController;
use crate::rpc::{CalculatorClient, FaultKind, RpcError};

/// One call of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallPlan {
    pub call: ServiceCall,
    /// Overrides the client's routing key for this call.
    pub routing_key: Option<String>,
    /// Fault kinds this call's handlers take care of.
    pub traps: Vec<FaultKind>,
}

impl CallPlan {
    /// A plan with the traps of the method it invokes.
    #[must_use]
    pub fn new(call: ServiceCall) -> Self {
        let traps = default_traps(&call);
        Self {
            call,
            routing_key: None,
            traps,
        }
    }

    #[must_use]
    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    #[must_use]
    pub fn trapping(mut self, traps: &[FaultKind]) -> Self {
        self.traps = traps.to_vec();
        self
    }

    /// Human-readable name used in logs and the report.
    #[must_use]
    pub fn label(&self) -> String {
        describe(&self.call)
    }
}

/// `ping`/`add` trap transport faults; `calculate` also traps its declared
/// application fault; one-way `zip` traps nothing.
#[must_use]
pub fn default_traps(call: &ServiceCall) -> Vec<FaultKind> {
    match call {
        ServiceCall::Ping | ServiceCall::Add { .. } => vec![FaultKind::Transport],
        ServiceCall::Calculate { .. } => vec![FaultKind::Application, FaultKind::Transport],
        ServiceCall::Zip => Vec::new(),
    }
}

/// Formats a call as `method(args)`.
#[must_use]
pub fn describe(call: &ServiceCall) -> String {
    match call {
        ServiceCall::Ping => "ping()".to_string(),
        ServiceCall::Add { num1, num2 } => format!("add({num1}, {num2})"),
        ServiceCall::Calculate { logid, w } => {
            format!("calculate({logid}, {} {} {})", w.num1, w.op, w.num2)
        }
        ServiceCall::Zip => "zip()".to_string(),
    }
}

/// The demonstration batch, every call routed with `routing_key`.
#[must_use]
pub fn default_batch(routing_key: &str) -> Vec<CallPlan> {
    let calculations = [
        (1, Work::new(2, 3, Operation::Add)),
        (2, Work::new(2, 3, Operation::Subtract)),
        (3, Work::new(2, 3, Operation::Multiply)),
        (4, Work::new(2, 3, Operation::Divide)),
        (5, Work::new(2, 0, Operation::Divide)),
    ];

    let mut batch = vec![
        CallPlan::new(ServiceCall::Ping),
        CallPlan::new(ServiceCall::Add { num1: 1, num2: 2 }),
    ];
    batch.extend(
        calculations
            .into_iter()
            .map(|(logid, w)| CallPlan::new(ServiceCall::Calculate { logid, w })),
    );
    batch.push(CallPlan::new(ServiceCall::Zip));

    batch
        .into_iter()
        .map(|plan| plan.with_routing_key(routing_key))
        .collect()
}

/// Issues one planned call and returns its raw result.
pub async fn issue<C: Codec>(
    client: &CalculatorClient<C>,
    plan: &CallPlan,
) -> Result<ReturnValue, RpcError> {
    let routed;
    let client = match &plan.routing_key {
        Some(key) if key != client.routing_key() => {
            routed = client.routed(key.clone());
            &routed
        }
        _ => client,
    };

    match &plan.call {
        ServiceCall::Ping => client.ping().await.map(|()| ReturnValue::Void),
        ServiceCall::Add { num1, num2 } => client.add(*num1, *num2).await.map(ReturnValue::I32),
        ServiceCall::Calculate { logid, w } => {
            client.calculate(*logid, *w).await.map(ReturnValue::I32)
        }
        ServiceCall::Zip => client.zip().await.map(|()| ReturnValue::Void),
    }
}

/// Issues every plan concurrently and waits until all of them are settled.
///
/// Each outcome is logged by its handler as soon as it is known. The call
/// that settles last fires `shutdown`; until then the signal stays down. A
/// failing call never keeps the others from settling.
pub async fn run_batch<C: Codec>(
    client: &CalculatorClient<C>,
    plans: Vec<CallPlan>,
    shutdown: &ShutdownController,
) -> BatchReport {
    shutdown.set_running();
    info!(calls = plans.len(), routing_key = client.routing_key(), "issuing batch");

    let calls: Vec<_> = plans
        .into_iter()
        .map(|plan| {
            let guard = shutdown.call_guard();
            async move {
                let label = plan.label();
                let outcome = settle(issue(client, &plan).await, &plan.traps);
                log_outcome(&label, &outcome);
                drop(guard);
                CallResult { label, outcome }
            }
        })
        .collect();
    shutdown.seal();

    let report = BatchReport::new(join_all(calls).await);
    report.log_summary();
    report
}

/// Runs a batch until the aggregated completion fires, or until `interrupt`
/// resolves first.
///
/// Returns `None` when interrupted. Either way shutdown has fired by the time
/// this returns.
pub async fn run_until_settled<C, I>(
    client: &CalculatorClient<C>,
    plans: Vec<CallPlan>,
    shutdown: &ShutdownController,
    interrupt: I,
) -> Option<BatchReport>
where
    C: Codec,
    I: Future<Output = ()>,
{
    let report = tokio::select! {
        report = run_batch(client, plans, shutdown) => Some(report),
        () = interrupt => {
            warn!(
                pending = client.transport().pending_count(),
                "interrupted before every call settled"
            );
            shutdown.trigger_shutdown();
            None
        }
    };
    shutdown.wait_for_shutdown().await;
    report
}
