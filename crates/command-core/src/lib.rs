//! Command normalization: loose upstream intent records in, typed
//! [`voxpilot_core_types::Command`]s out.
//!
//! Upstream parsing is a language model; nothing it produces is trusted
//! until it passes the per-type schemas here. Normalization is a pure
//! transform with all-or-nothing semantics per record.

pub mod errors;
pub mod model;
pub mod normalizer;
mod schema;

pub use errors::NormalizeError;
pub use model::{RawAction, RawIntent};
pub use normalizer::Normalizer;
