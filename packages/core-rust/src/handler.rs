//! Reference implementation of the calculator service.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::traits::Calculator;
use crate::types::{InvalidOperation, Operation, Work};

/// Evaluates `work` with checked `i32` arithmetic.
///
/// Division truncates toward zero, so `2 / 3 == 0`.
///
/// # Errors
///
/// Returns `InvalidOperation` on division by zero or overflow.
pub fn evaluate(work: Work) -> Result<i32, InvalidOperation> {
    let Work { num1, num2, op } = work;
    let result = match op {
        Operation::Add => num1.checked_add(num2),
        Operation::Subtract => num1.checked_sub(num2),
        Operation::Multiply => num1.checked_mul(num2),
        Operation::Divide => {
            if num2 == 0 {
                return Err(InvalidOperation::new(op.code(), "Cannot divide by 0"));
            }
            num1.checked_div(num2)
        }
    };
    result.ok_or_else(|| InvalidOperation::new(op.code(), "Integer overflow"))
}

/// Calculator that keeps the last result per `logid`.
#[derive(Debug, Default)]
pub struct CalculatorHandler {
    log: Mutex<HashMap<i32, i32>>,
}

impl CalculatorHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Result recorded for `logid`, if a calculation with that id succeeded.
    #[must_use]
    pub fn logged(&self, logid: i32) -> Option<i32> {
        self.log.lock().get(&logid).copied()
    }
}

#[async_trait]
impl Calculator for CalculatorHandler {
    async fn ping(&self) {
        info!("ping()");
    }

    async fn add(&self, num1: i32, num2: i32) -> i32 {
        info!(num1, num2, "add()");
        num1.wrapping_add(num2)
    }

    async fn calculate(&self, logid: i32, work: Work) -> Result<i32, InvalidOperation> {
        info!(logid, num1 = work.num1, num2 = work.num2, op = %work.op, "calculate()");
        let value = evaluate(work)?;
        self.log.lock().insert(logid, value);
        Ok(value)
    }

    async fn zip(&self) {
        debug!("zip()");
    }
}
