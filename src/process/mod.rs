//! Child-process execution: spawning, streaming, liveness

pub mod monitor;
pub mod runner;

pub use monitor::StuckProcessMonitor;
pub use runner::{ExecResult, InterruptHandle, OutputListener};
