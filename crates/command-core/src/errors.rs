use thiserror::Error;
use voxpilot_core_types::CommandType;

/// Normalization failures. All of these surface immediately to the caller;
/// none reach planning or execution.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NormalizeError {
    /// The record is not something we can read at all.
    #[error("unparseable intent record: {0}")]
    Parse(String),

    /// The `intent` value is outside the closed command set.
    #[error("unsupported command type: {0}")]
    UnsupportedCommand(String),

    /// A recognized command failed its schema.
    #[error("{command} command invalid: {reason}")]
    Validation {
        command: CommandType,
        reason: String,
    },
}

impl NormalizeError {
    pub fn validation(command: CommandType, reason: impl Into<String>) -> Self {
        Self::Validation {
            command,
            reason: reason.into(),
        }
    }
}
