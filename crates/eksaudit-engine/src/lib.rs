//! EKS Audit Engine - evaluates controls against live facts
//!
//! This crate provides:
//! - `evaluate`: scores one fact against one assertion
//! - `ControlExecutor`: runs a single control through its state machine
//! - `ResultAggregator` / `RunSummary`: per-run report keyed by control id
//! - `Engine`: bounded concurrent runner with per-control timeouts and cancellation

pub mod aggregator;
pub mod cancel;
pub mod duration;
pub mod evaluator;
pub mod executor;
pub mod runner;

pub use aggregator::{ComplianceCoverage, OutcomeCounts, ResultAggregator, RunSummary};
pub use cancel::CancelSignal;
pub use evaluator::{evaluate, EvalError, Verdict};
pub use executor::{ControlExecutor, Phase};
pub use runner::Engine;
