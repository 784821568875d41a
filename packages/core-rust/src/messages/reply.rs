//! Reply-side frames.

use serde::{Deserialize, Serialize};

use crate::types::{ApplicationException, ServiceFault};

/// Return value of a successful two-way call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReturnValue {
    Void,
    I32(i32),
}

/// Outcome carried by a reply frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ReplyBody {
    /// The method returned normally.
    Success { result: ReturnValue },
    /// The method raised one of its declared exceptions.
    Fault { fault: ServiceFault },
    /// The frame could not be processed at all.
    Exception { exception: ApplicationException },
}

/// A complete reply frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyFrame {
    /// Sequence id of the request being answered.
    pub seq_id: i32,
    /// Method name of the request being answered.
    pub method: String,
    pub body: ReplyBody,
}

impl ReplyFrame {
    #[must_use]
    pub fn success(seq_id: i32, method: impl Into<String>, result: ReturnValue) -> Self {
        Self {
            seq_id,
            method: method.into(),
            body: ReplyBody::Success { result },
        }
    }

    #[must_use]
    pub fn fault(seq_id: i32, method: impl Into<String>, fault: ServiceFault) -> Self {
        Self {
            seq_id,
            method: method.into(),
            body: ReplyBody::Fault { fault },
        }
    }

    #[must_use]
    pub fn exception(
        seq_id: i32,
        method: impl Into<String>,
        exception: ApplicationException,
    ) -> Self {
        Self {
            seq_id,
            method: method.into(),
            body: ReplyBody::Exception { exception },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InvalidOperation;

    #[test]
    fn body_is_tagged_by_status() {
        let frame = ReplyFrame::fault(
            5,
            "calculate",
            InvalidOperation::new(4, "Cannot divide by 0").into(),
        );
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["seqId"], 5);
        assert_eq!(json["body"]["status"], "fault");
        assert_eq!(
            json["body"]["fault"]["invalidOperation"]["why"],
            "Cannot divide by 0"
        );
    }

    #[test]
    fn void_and_i32_results() {
        let void = serde_json::to_value(ReplyFrame::success(1, "ping", ReturnValue::Void)).unwrap();
        assert_eq!(void["body"]["result"], "void");

        let value = serde_json::to_value(ReplyFrame::success(2, "add", ReturnValue::I32(3))).unwrap();
        assert_eq!(value["body"]["result"]["i32"], 3);
    }
}
