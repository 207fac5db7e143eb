//! Session lifecycle and browser-handle ownership.
//!
//! One session owns exactly one browser handle for the session's lifetime,
//! and at most one workflow is in flight per session. Aborting is
//! idempotent: the first abort cancels and releases, later aborts observe
//! the same state.

pub mod api;
pub mod errors;
pub mod model;
pub mod state;

pub use api::SessionRegistry;
pub use errors::RegistryError;
pub use model::{LifeState, SessionCtx, WorkflowLease};
pub use state::RegistryImpl;
