//! Narrow interface onto the external browser-automation service.
//!
//! The execution engine drives exactly one of these operations per step and
//! is otherwise agnostic to what the operation does. Implementations wrap a
//! concrete transport; the [`mock::MockBridge`] here is the scripted
//! stand-in used by tests and the demo CLI.

pub mod api;
pub mod error;
pub mod mock;

pub use api::{BrowserBridge, ScrollDirection};
pub use error::BridgeError;
pub use mock::MockBridge;
