//! voxpilot library
//!
//! The command-interpretation and workflow-execution core of a voice-driven
//! browser agent. Speech capture, NLU, TTS, and the real browser transport
//! live outside; this crate takes an already-parsed intent record and turns
//! it into validated commands, a dependency-aware workflow, a retried
//! execution against one browser handle, and a single response record.

pub mod agent;
pub mod config;
pub mod errors;

pub use agent::{Agent, SessionStats};
pub use config::VoxConfig;
pub use errors::AgentError;

// Re-export commonly used types for hosts embedding the core
pub use browser_bridge::{BrowserBridge, MockBridge};
pub use step_flow::{Response, StepSummary};
pub use voxpilot_core_types::{Command, CommandType, SessionId, WorkflowStatus};
