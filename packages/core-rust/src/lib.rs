//! `amqrpc` core: calculator service contract, RPC frames and codecs.

pub mod codec;
pub mod handler;
pub mod messages;
pub mod processor;
pub mod traits;
pub mod types;

pub use codec::{Codec, CodecError, JsonCodec, MsgPackCodec};
pub use handler::CalculatorHandler;
pub use messages::{MessageKind, ReplyBody, ReplyFrame, RequestFrame, ReturnValue, ServiceCall};
pub use traits::Calculator;
pub use types::{ApplicationException, ExceptionKind, InvalidOperation, Operation, ServiceFault, Work};
