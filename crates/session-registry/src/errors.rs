use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum RegistryError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session already ended: {0}")]
    SessionEnded(String),

    #[error("session {0} already has a workflow in flight")]
    WorkflowInFlight(String),

    #[error("no browser handle available: {0}")]
    HandleUnavailable(String),
}
