//! Workflow planning: ordered commands in, a dependency-aware step graph out.
//!
//! Planning is pure and deterministic: the same commands against the same
//! context and memory snapshots always produce the same graph, including
//! step ids. Nothing here touches the browser; planning failures abort
//! before any side effect happens.

pub mod errors;
pub mod planner;

pub use errors::PlanError;
pub use planner::{PlannerContext, WorkflowPlanner};
