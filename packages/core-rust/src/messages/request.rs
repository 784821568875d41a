//! Request-side frames.

use serde::{Deserialize, Serialize};

use super::method_names;
use crate::types::Work;

/// Whether the caller expects a reply for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    /// Two-way call; the worker must answer with a reply frame.
    Call,
    /// Fire-and-forget; the worker never answers.
    Oneway,
}

/// Typed invocation of one calculator method.
///
/// Serialized with a `method` tag so a worker that does not know a variant can
/// still read the frame header and answer with an exception.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum ServiceCall {
    Ping,
    Add { num1: i32, num2: i32 },
    Calculate { logid: i32, w: Work },
    Zip,
}

impl ServiceCall {
    /// Wire name of the invoked method.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::Ping => method_names::PING,
            Self::Add { .. } => method_names::ADD,
            Self::Calculate { .. } => method_names::CALCULATE,
            Self::Zip => method_names::ZIP,
        }
    }

    /// The message kind the service definition fixes for this method.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Zip => MessageKind::Oneway,
            _ => MessageKind::Call,
        }
    }
}

/// A complete request frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestFrame {
    pub seq_id: i32,
    pub kind: MessageKind,
    pub call: ServiceCall,
}

impl RequestFrame {
    /// Builds a frame whose kind matches the method's declared kind.
    #[must_use]
    pub fn new(seq_id: i32, call: ServiceCall) -> Self {
        Self {
            seq_id,
            kind: call.kind(),
            call,
        }
    }
}

/// The part of a request frame readable without knowing the call variant.
///
/// Used by workers to answer undecodable calls with an exception.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestHeader {
    pub seq_id: i32,
    pub kind: MessageKind,
    #[serde(default)]
    pub call: Option<CallName>,
}

/// Only the `method` tag of an arbitrary call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CallName {
    pub method: String,
}
