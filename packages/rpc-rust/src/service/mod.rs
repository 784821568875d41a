//! Worker side: the calculator service and the background worker it runs on.

pub mod calculator;
pub mod config;
pub mod worker;

pub use calculator::{CalculatorService, CalculatorWorker, WorkerStats};
pub use config::WorkerConfig;
pub use worker::{BackgroundRunnable, BackgroundWorker};
