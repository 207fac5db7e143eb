use std::time::Duration;

use voxpilot_core_types::{ExecutionResult, StepId, StepStatus};

/// Engine knobs. Defaults match the original agent: three attempts per
/// step, 300ms backoff base, 30s per-step deadline, sequential execution
/// (browser operations are not generally safe to interleave on one handle).
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Attempt ceiling per step, first try included.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Fraction of the backoff added as random jitter.
    pub jitter_ratio: f64,
    pub step_timeout: Duration,
    /// Concurrency for read-only steps; mutating steps always serialize.
    pub parallel_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(300),
            backoff_cap: Duration::from_secs(10),
            jitter_ratio: 0.2,
            step_timeout: Duration::from_secs(30),
            parallel_limit: 1,
        }
    }
}

/// Result of running one step to its terminal state, applied back onto the
/// workflow in completion order.
#[derive(Debug)]
pub(crate) struct StepOutcome {
    pub id: StepId,
    pub status: StepStatus,
    pub attempts: u32,
    pub result: Option<ExecutionResult>,
}
