use thiserror::Error;
use voxpilot_core_types::StepId;

/// Planning failures. All of these fire before execution starts, so a bad
/// plan never produces partial browser side effects.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlanError {
    /// A `$prev.key` / `$stepN.key` parameter points at nothing that can
    /// supply the value.
    #[error("unresolvable reference {reference} in command {ordinal}")]
    UnresolvableReference { ordinal: usize, reference: String },

    /// Defensive: the constructed graph contains a cycle.
    #[error("circular dependency involving {0}")]
    CircularDependency(StepId),

    #[error("plan contains no steps")]
    EmptyPlan,
}
