use thiserror::Error;

use command_core::NormalizeError;
use voxpilot_registry::RegistryError;
use workflow_planner::PlanError;

/// Failures of `submit_intent` itself. Everything here fires before or
/// instead of execution; execution-phase failures come back inside the
/// response with the failing steps marked.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    /// Resource exhaustion or session misuse: no browser handle, session
    /// already busy or ended.
    #[error(transparent)]
    Session(#[from] RegistryError),
}
