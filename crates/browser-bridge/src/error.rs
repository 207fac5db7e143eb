use thiserror::Error;
use voxpilot_core_types::{ErrorInfo, ErrorKind};

/// Failures surfaced by the browser-automation service.
///
/// The split matters: transient failures are retried by the engine,
/// permanent ones fail the step immediately.
#[derive(Debug, Error, Clone)]
pub enum BridgeError {
    #[error("browser operation timed out after {0}ms")]
    Timeout(u64),

    #[error("transient network error: {0}")]
    Network(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("authentication failure: {0}")]
    AuthFailure(String),

    #[error("browser handle is closed")]
    HandleClosed,

    #[error("no browser handle available")]
    NoHandleAvailable,

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Timeout(_) | BridgeError::Network(_) => ErrorKind::Transient,
            BridgeError::ElementNotFound(_)
            | BridgeError::InvalidSelector(_)
            | BridgeError::AuthFailure(_)
            | BridgeError::HandleClosed
            | BridgeError::NoHandleAvailable
            | BridgeError::Unsupported(_) => ErrorKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<&BridgeError> for ErrorInfo {
    fn from(err: &BridgeError) -> Self {
        ErrorInfo {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_retry_policy() {
        assert!(BridgeError::Timeout(5000).is_transient());
        assert!(BridgeError::Network("reset".into()).is_transient());
        assert!(!BridgeError::ElementNotFound("#login".into()).is_transient());
        assert!(!BridgeError::AuthFailure("401".into()).is_transient());
    }
}
