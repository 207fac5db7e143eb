//! Step execution engine and result aggregation.
//!
//! The engine walks a workflow's dependency graph, advancing steps whose
//! dependencies are satisfied, one browser-bridge operation per step, with
//! retry-on-transient, skip-on-failed-dependency, and cooperative abort.
//! The aggregator folds terminal step results into one response record.

pub mod aggregate;
pub mod engine;
pub mod metrics;
pub mod model;

pub use aggregate::{aggregate, Response, StepSummary};
pub use engine::StepFlowEngine;
pub use model::EngineConfig;
