//! Typed calculator client over an [`RpcTransport`].

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use amqrpc_core::{
    Codec, MessageKind, MsgPackCodec, ReplyBody, ReplyFrame, RequestFrame, ReturnValue,
    ServiceCall, Work,
};
use tracing::debug;

use super::error::RpcError;
use super::transport::RpcTransport;

/// Calculator client.
///
/// Cloning is cheap; clones share the transport and the sequence counter.
pub struct CalculatorClient<C: Codec = MsgPackCodec> {
    transport: Arc<RpcTransport>,
    codec: Arc<C>,
    next_seq: Arc<AtomicI32>,
    route: Option<Arc<str>>,
}

impl<C: Codec> Clone for CalculatorClient<C> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            codec: Arc::clone(&self.codec),
            next_seq: Arc::clone(&self.next_seq),
            route: self.route.clone(),
        }
    }
}

impl<C: Codec> CalculatorClient<C> {
    #[must_use]
    pub fn new(transport: Arc<RpcTransport>, codec: C) -> Self {
        Self {
            transport,
            codec: Arc::new(codec),
            next_seq: Arc::new(AtomicI32::new(1)),
            route: None,
        }
    }

    /// A client on the same transport whose calls use `routing_key`.
    #[must_use]
    pub fn routed(&self, routing_key: impl Into<String>) -> Self {
        Self {
            route: Some(Arc::from(routing_key.into())),
            ..self.clone()
        }
    }

    /// Routing key this client publishes with.
    #[must_use]
    pub fn routing_key(&self) -> &str {
        self.route
            .as_deref()
            .unwrap_or_else(|| self.transport.routing_key())
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<RpcTransport> {
        &self.transport
    }

    /// # Errors
    ///
    /// Fails with `RpcError::Transport` if the request is unroutable, or any
    /// other `RpcError` if the call did not complete.
    pub async fn ping(&self) -> Result<(), RpcError> {
        let value = self.call(ServiceCall::Ping).await?;
        expect_void(value, ServiceCall::Ping.method())
    }

    /// # Errors
    ///
    /// See [`CalculatorClient::ping`].
    pub async fn add(&self, num1: i32, num2: i32) -> Result<i32, RpcError> {
        let call = ServiceCall::Add { num1, num2 };
        let method = call.method();
        expect_i32(self.call(call).await?, method)
    }

    /// # Errors
    ///
    /// Fails with `RpcError::Application` when the service raises
    /// `InvalidOperation`, in addition to the errors of
    /// [`CalculatorClient::ping`].
    pub async fn calculate(&self, logid: i32, work: Work) -> Result<i32, RpcError> {
        let call = ServiceCall::Calculate { logid, w: work };
        let method = call.method();
        expect_i32(self.call(call).await?, method)
    }

    /// One-way call. Completes once the request is handed to the broker.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Codec` or `RpcError::Broker` if the request could
    /// not be published.
    pub async fn zip(&self) -> Result<(), RpcError> {
        let frame = RequestFrame::new(self.next_seq(), ServiceCall::Zip);
        debug_assert_eq!(frame.kind, MessageKind::Oneway);
        let body = self.codec.encode_request(&frame)?;
        self.transport.post_to(self.routing_key(), body).await
    }

    fn next_seq(&self) -> i32 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    async fn call(&self, call: ServiceCall) -> Result<ReturnValue, RpcError> {
        let method = call.method();
        let seq_id = self.next_seq();
        let body = self.codec.encode_request(&RequestFrame::new(seq_id, call))?;

        let pending = self.transport.send_to(self.routing_key(), body).await?;
        debug!(method, seq_id, correlation_id = %pending.id(), "call issued");

        let reply = self.codec.decode_reply(&pending.await?)?;
        check_reply(&reply, method, seq_id)?;
        match reply.body {
            ReplyBody::Success { result } => Ok(result),
            ReplyBody::Fault { fault } => Err(RpcError::Application(fault)),
            ReplyBody::Exception { exception } => Err(RpcError::Remote(exception)),
        }
    }
}

fn check_reply(reply: &ReplyFrame, method: &str, seq_id: i32) -> Result<(), RpcError> {
    // Exceptions for unreadable requests may carry an empty method name.
    let method_matches = reply.method == method
        || (reply.method.is_empty() && matches!(reply.body, ReplyBody::Exception { .. }));
    if !method_matches {
        return Err(RpcError::Protocol(format!(
            "wrong method name: expected '{method}', got '{}'",
            reply.method
        )));
    }
    if reply.seq_id != seq_id {
        return Err(RpcError::Protocol(format!(
            "bad sequence id for {method}: expected {seq_id}, got {}",
            reply.seq_id
        )));
    }
    Ok(())
}

fn expect_void(value: ReturnValue, method: &str) -> Result<(), RpcError> {
    match value {
        ReturnValue::Void => Ok(()),
        ReturnValue::I32(v) => Err(RpcError::Protocol(format!(
            "{method} returned {v}, expected no value"
        ))),
    }
}

fn expect_i32(value: ReturnValue, method: &str) -> Result<i32, RpcError> {
    match value {
        ReturnValue::I32(v) => Ok(v),
        ReturnValue::Void => Err(RpcError::Protocol(format!(
            "{method} returned no value: missing result"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use amqrpc_core::processor::process;
    use amqrpc_core::{
        ApplicationException, CalculatorHandler, ExceptionKind, InvalidOperation, JsonCodec,
        Operation, ServiceFault,
    };
    use tokio::sync::mpsc;

    use super::*;
    use crate::broker::{
        declare_service_queue, declare_topology, Delivery, MemoryBroker, OutboundMessage,
        TopologyConfig,
    };
    use crate::rpc::transport::TransportConfig;
    use crate::traits::BrokerChannel;

    async fn service_requests(broker: &MemoryBroker) -> (Arc<dyn BrokerChannel>, mpsc::UnboundedReceiver<Delivery>) {
        let channel: Arc<dyn BrokerChannel> = Arc::new(broker.channel());
        let topology = TopologyConfig::default();
        declare_topology(channel.as_ref(), &topology).await.unwrap();
        let queue = declare_service_queue(channel.as_ref(), &topology).await.unwrap();
        let requests = channel.consume(&queue).await.unwrap();
        (channel, requests)
    }

    async fn reply(channel: &dyn BrokerChannel, request: Delivery, body: Vec<u8>) {
        let reply_to = request.reply_to.unwrap_or_default();
        let message = OutboundMessage {
            body,
            correlation_id: request.correlation_id,
            reply_to: None,
            mandatory: false,
        };
        channel.publish("responses", &reply_to, message).await.unwrap();
    }

    /// Answers requests on the service queue with `respond`.
    async fn responder<F>(broker: &MemoryBroker, respond: F)
    where
        F: Fn(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        let (channel, mut requests) = service_requests(broker).await;
        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                if let Some(body) = respond(&request.body) {
                    reply(channel.as_ref(), request, body).await;
                }
            }
        });
    }

    /// Responder backed by the reference calculator.
    async fn calculator(broker: &MemoryBroker) {
        let (channel, mut requests) = service_requests(broker).await;
        tokio::spawn(async move {
            let handler = CalculatorHandler::new();
            while let Some(request) = requests.recv().await {
                if let Some(body) = process(&handler, &MsgPackCodec, &request.body).await.unwrap() {
                    reply(channel.as_ref(), request, body).await;
                }
            }
        });
    }

    async fn client_on<C: Codec>(broker: &MemoryBroker, codec: C) -> CalculatorClient<C> {
        let channel: Arc<dyn BrokerChannel> = Arc::new(broker.channel());
        declare_topology(channel.as_ref(), &TopologyConfig::default())
            .await
            .unwrap();
        let transport = RpcTransport::setup(channel, TransportConfig::default())
            .await
            .unwrap();
        CalculatorClient::new(transport, codec)
    }

    #[tokio::test]
    async fn calls_return_decoded_values() {
        let broker = MemoryBroker::new();
        calculator(&broker).await;
        let client = client_on(&broker, MsgPackCodec).await;

        client.ping().await.unwrap();
        assert_eq!(client.add(1, 2).await.unwrap(), 3);
        let sum = client
            .calculate(1, Work::new(2, 3, Operation::Add))
            .await
            .unwrap();
        assert_eq!(sum, 5);
        let quotient = client
            .calculate(4, Work::new(2, 3, Operation::Divide))
            .await
            .unwrap();
        assert_eq!(quotient, 0);
    }

    #[tokio::test]
    async fn declared_fault_maps_to_application_error() {
        let broker = MemoryBroker::new();
        calculator(&broker).await;
        let client = client_on(&broker, MsgPackCodec).await;

        let err = client
            .calculate(5, Work::new(2, 0, Operation::Divide))
            .await
            .unwrap_err();
        match err {
            RpcError::Application(ServiceFault::InvalidOperation(InvalidOperation {
                what_op,
                why,
            })) => {
                assert_eq!(what_op, Operation::Divide.code());
                assert_eq!(why, "Cannot divide by 0");
            }
            other => panic!("expected application fault, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unroutable_call_fails_with_transport_fault() {
        let broker = MemoryBroker::new();
        responder(&broker, |_| None).await;
        let client = client_on(&broker, MsgPackCodec).await;

        let err = client.routed("calculatorxxx").ping().await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(ref f) if f.routing_key == "calculatorxxx"));
        assert_eq!(client.transport().pending_count(), 0);
    }

    #[tokio::test]
    async fn routed_client_shares_transport() {
        let broker = MemoryBroker::new();
        let client = client_on(&broker, MsgPackCodec).await;
        let routed = client.routed("other");
        assert_eq!(client.routing_key(), "calculator");
        assert_eq!(routed.routing_key(), "other");
        assert!(Arc::ptr_eq(client.transport(), routed.transport()));
    }

    #[tokio::test]
    async fn mismatched_sequence_id_is_a_protocol_error() {
        let broker = MemoryBroker::new();
        responder(&broker, |bytes| {
            let frame = MsgPackCodec.decode_request(bytes).unwrap();
            let reply = ReplyFrame::success(frame.seq_id + 100, "ping", ReturnValue::Void);
            Some(MsgPackCodec.encode_reply(&reply).unwrap())
        })
        .await;
        let client = client_on(&broker, MsgPackCodec).await;

        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, RpcError::Protocol(ref m) if m.contains("bad sequence id")));
    }

    #[tokio::test]
    async fn mismatched_method_is_a_protocol_error() {
        let broker = MemoryBroker::new();
        responder(&broker, |bytes| {
            let frame = MsgPackCodec.decode_request(bytes).unwrap();
            let reply = ReplyFrame::success(frame.seq_id, "add", ReturnValue::I32(3));
            Some(MsgPackCodec.encode_reply(&reply).unwrap())
        })
        .await;
        let client = client_on(&broker, MsgPackCodec).await;

        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, RpcError::Protocol(ref m) if m.contains("wrong method name")));
    }

    #[tokio::test]
    async fn missing_result_is_a_protocol_error() {
        let broker = MemoryBroker::new();
        responder(&broker, |bytes| {
            let frame = MsgPackCodec.decode_request(bytes).unwrap();
            let reply = ReplyFrame::success(frame.seq_id, "add", ReturnValue::Void);
            Some(MsgPackCodec.encode_reply(&reply).unwrap())
        })
        .await;
        let client = client_on(&broker, MsgPackCodec).await;

        let err = client.add(1, 2).await.unwrap_err();
        assert!(matches!(err, RpcError::Protocol(ref m) if m.contains("missing result")));
    }

    #[tokio::test]
    async fn undecodable_reply_is_a_codec_error() {
        let broker = MemoryBroker::new();
        responder(&broker, |_| Some(b"not msgpack".to_vec())).await;
        let client = client_on(&broker, MsgPackCodec).await;

        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, RpcError::Codec(_)));
    }

    #[tokio::test]
    async fn exception_reply_maps_to_remote_error() {
        let broker = MemoryBroker::new();
        responder(&broker, |bytes| {
            let header = JsonCodec.decode_request_header(bytes).unwrap();
            let reply = ReplyFrame::exception(
                header.seq_id,
                "",
                ApplicationException::new(ExceptionKind::ProtocolError, "unreadable call"),
            );
            Some(JsonCodec.encode_reply(&reply).unwrap())
        })
        .await;
        let client = client_on(&broker, JsonCodec).await;

        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, RpcError::Remote(ref e) if e.message == "unreadable call"));
    }

    #[tokio::test]
    async fn zip_publishes_without_waiting() {
        let broker = MemoryBroker::new();
        let (seen_tx, mut seen) = mpsc::unbounded_channel();
        responder(&broker, move |bytes| {
            let frame = MsgPackCodec.decode_request(bytes).unwrap();
            seen_tx.send(frame).unwrap();
            None
        })
        .await;
        let client = client_on(&broker, MsgPackCodec).await;

        client.zip().await.unwrap();
        assert_eq!(client.transport().pending_count(), 0);
        let frame = seen.recv().await.unwrap();
        assert_eq!(frame.kind, MessageKind::Oneway);
        assert_eq!(frame.call, ServiceCall::Zip);
    }
}
