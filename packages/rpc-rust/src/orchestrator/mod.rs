//! Client-side call orchestration: issue a batch, settle every call, then
//! shut down.

pub mod batch;
pub mod outcome;
pub mod shutdown;

pub use batch::{default_batch, default_traps, describe, issue, run_batch, run_until_settled, CallPlan};
pub use outcome::{settle, BatchReport, CallOutcome, CallResult};
pub use shutdown::{CallGuard, RunState, ShutdownController};
