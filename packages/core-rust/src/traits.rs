use async_trait::async_trait;

use crate::types::{InvalidOperation, Work};

/// The calculator service contract.
///
/// Workers implement this trait; clients reach it through the broker. `zip`
/// is one-way: nothing it does is ever reported back to the caller.
#[async_trait]
pub trait Calculator: Send + Sync {
    /// Liveness check.
    async fn ping(&self);

    /// Adds two integers.
    async fn add(&self, num1: i32, num2: i32) -> i32;

    /// Evaluates `work`. `logid` identifies the computation in the worker's log.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` when the operation cannot be evaluated
    /// (division by zero, overflow).
    async fn calculate(&self, logid: i32, work: Work) -> Result<i32, InvalidOperation>;

    /// One-way notification.
    async fn zip(&self);
}
