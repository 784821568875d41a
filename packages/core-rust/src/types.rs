use std::fmt;

use serde::{Deserialize, Serialize};

/// Arithmetic operation selector for `Calculator::calculate`.
///
/// Wire names are upper-case (`"ADD"`, `"DIVIDE"`, ...). The numeric codes
/// match the service definition and are echoed back in
/// `InvalidOperation::what_op`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operation {
    /// Numeric code of this operation in the service definition.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Add => 1,
            Self::Subtract => 2,
            Self::Multiply => 3,
            Self::Divide => 4,
        }
    }
}

impl TryFrom<i32> for Operation {
    type Error = InvalidOperation;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Add),
            2 => Ok(Self::Subtract),
            3 => Ok(Self::Multiply),
            4 => Ok(Self::Divide),
            other => Err(InvalidOperation::new(other, "Invalid operation")),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Add => "ADD",
            Self::Subtract => "SUBTRACT",
            Self::Multiply => "MULTIPLY",
            Self::Divide => "DIVIDE",
        };
        f.write_str(name)
    }
}

/// Typed request payload for `Calculator::calculate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Work {
    pub num1: i32,
    pub num2: i32,
    pub op: Operation,
}

impl Work {
    #[must_use]
    pub fn new(num1: i32, num2: i32, op: Operation) -> Self {
        Self { num1, num2, op }
    }
}

/// Declared domain exception of `Calculator::calculate`.
///
/// Travels inside a successful reply frame; the caller sees it as an
/// application fault, not as a transport failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("invalid operation {what_op}: {why}")]
pub struct InvalidOperation {
    /// Code of the offending operation.
    pub what_op: i32,
    /// Human-readable reason.
    pub why: String,
}

impl InvalidOperation {
    #[must_use]
    pub fn new(what_op: i32, why: impl Into<String>) -> Self {
        Self {
            what_op,
            why: why.into(),
        }
    }
}

/// Every declared exception a service method may raise.
///
/// Only `calculate` declares one today; the enum keeps the fault type
/// explicit so callers match on it instead of on strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
pub enum ServiceFault {
    #[error(transparent)]
    InvalidOperation(InvalidOperation),
}

impl From<InvalidOperation> for ServiceFault {
    fn from(fault: InvalidOperation) -> Self {
        Self::InvalidOperation(fault)
    }
}

/// Classification of protocol-level failures reported by the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExceptionKind {
    Unknown,
    UnknownMethod,
    InvalidMessageType,
    WrongMethodName,
    BadSequenceId,
    MissingResult,
    InternalError,
    ProtocolError,
}

/// Undeclared, protocol-level failure raised while processing a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{kind:?}: {message}")]
pub struct ApplicationException {
    pub kind: ExceptionKind,
    pub message: String,
}

impl ApplicationException {
    #[must_use]
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_codes_follow_service_definition() {
        assert_eq!(Operation::Add.code(), 1);
        assert_eq!(Operation::Subtract.code(), 2);
        assert_eq!(Operation::Multiply.code(), 3);
        assert_eq!(Operation::Divide.code(), 4);
    }

    #[test]
    fn operation_from_code() {
        assert_eq!(Operation::try_from(4), Ok(Operation::Divide));
        let err = Operation::try_from(9).unwrap_err();
        assert_eq!(err.what_op, 9);
        assert_eq!(err.why, "Invalid operation");
    }

    #[test]
    fn operation_wire_name_is_upper_case() {
        let json = serde_json::to_string(&Operation::Multiply).unwrap();
        assert_eq!(json, "\"MULTIPLY\"");
        assert_eq!(Operation::Multiply.to_string(), "MULTIPLY");
    }

    #[test]
    fn invalid_operation_display() {
        let fault = InvalidOperation::new(4, "Cannot divide by 0");
        assert_eq!(fault.to_string(), "invalid operation 4: Cannot divide by 0");
        let wrapped = ServiceFault::from(fault.clone());
        assert_eq!(wrapped.to_string(), fault.to_string());
    }
}
