//! Worker-side frame processing: request bytes in, reply bytes out.

use tracing::warn;

use crate::codec::{Codec, CodecError};
use crate::messages::{MessageKind, ReplyFrame, RequestFrame, ReturnValue, ServiceCall};
use crate::traits::Calculator;
use crate::types::{ApplicationException, ExceptionKind, ServiceFault};

/// Decodes a request, invokes `handler` and encodes the reply.
///
/// Returns `Ok(None)` when no reply must be sent: one-way calls, and frames
/// so malformed that not even their header can be read.
///
/// # Errors
///
/// Returns `CodecError::Encode` if the reply cannot be encoded.
pub async fn process<H, C>(handler: &H, codec: &C, bytes: &[u8]) -> Result<Option<Vec<u8>>, CodecError>
where
    H: Calculator + ?Sized,
    C: Codec,
{
    let frame = match codec.decode_request(bytes) {
        Ok(frame) => frame,
        Err(err) => return reject_undecodable(codec, bytes, &err),
    };

    match dispatch(handler, frame).await {
        Some(reply) => codec.encode_reply(&reply).map(Some),
        None => Ok(None),
    }
}

/// Runs a decoded frame against `handler`.
///
/// Returns `None` for one-way frames.
pub async fn dispatch<H>(handler: &H, frame: RequestFrame) -> Option<ReplyFrame>
where
    H: Calculator + ?Sized,
{
    let RequestFrame { seq_id, kind, call } = frame;
    let method = call.method();

    if kind != call.kind() {
        if kind == MessageKind::Oneway {
            warn!(method, seq_id, "two-way method sent as one-way; dropping");
            return None;
        }
        return Some(ReplyFrame::exception(
            seq_id,
            method,
            ApplicationException::new(
                ExceptionKind::InvalidMessageType,
                format!("{method} is a one-way method"),
            ),
        ));
    }

    let reply = match call {
        ServiceCall::Ping => {
            handler.ping().await;
            ReplyFrame::success(seq_id, method, ReturnValue::Void)
        }
        ServiceCall::Add { num1, num2 } => {
            let sum = handler.add(num1, num2).await;
            ReplyFrame::success(seq_id, method, ReturnValue::I32(sum))
        }
        ServiceCall::Calculate { logid, w } => match handler.calculate(logid, w).await {
            Ok(value) => ReplyFrame::success(seq_id, method, ReturnValue::I32(value)),
            Err(fault) => ReplyFrame::fault(seq_id, method, ServiceFault::from(fault)),
        },
        ServiceCall::Zip => {
            handler.zip().await;
            return None;
        }
    };
    Some(reply)
}

fn reject_undecodable<C: Codec>(
    codec: &C,
    bytes: &[u8],
    err: &CodecError,
) -> Result<Option<Vec<u8>>, CodecError> {
    let Ok(header) = codec.decode_request_header(bytes) else {
        warn!(error = %err, "dropping request without a readable header");
        return Ok(None);
    };
    if header.kind == MessageKind::Oneway {
        warn!(seq_id = header.seq_id, error = %err, "dropping undecodable one-way request");
        return Ok(None);
    }

    let method = header.call.map(|c| c.method).unwrap_or_default();
    let kind = if method.is_empty() {
        ExceptionKind::ProtocolError
    } else {
        ExceptionKind::UnknownMethod
    };
    let reply = ReplyFrame::exception(
        header.seq_id,
        method,
        ApplicationException::new(kind, err.to_string()),
    );
    codec.encode_reply(&reply).map(Some)
}
