//! RPC frame schemas exchanged over the broker.
//!
//! A request frame carries a sequence id, its message kind and the typed call
//! (internally tagged by `method`). A reply frame echoes the sequence id and
//! method name and carries a body tagged by `status`. Field names are
//! camelCase on the wire for every codec.

pub mod reply;
pub mod request;

pub use reply::{ReplyBody, ReplyFrame, ReturnValue};
pub use request::{MessageKind, RequestFrame, RequestHeader, ServiceCall};

/// Method names of the calculator service, as they appear on the wire.
pub mod method_names {
    pub const PING: &str = "ping";
    pub const ADD: &str = "add";
    pub const CALCULATE: &str = "calculate";
    pub const ZIP: &str = "zip";
}
