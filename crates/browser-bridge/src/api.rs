use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use voxpilot_core_types::{FileRef, HandleId, ScreenshotRef};

use crate::error::BridgeError;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScrollDirection {
    Up,
    Down,
}

impl ScrollDirection {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "up" => Some(ScrollDirection::Up),
            "down" => Some(ScrollDirection::Down),
            _ => None,
        }
    }
}

/// Contract with the external browser-automation service.
///
/// Every call is synchronous from the engine's viewpoint (the calling step
/// suspends until it returns) and targets one handle, which belongs to
/// exactly one session.
#[async_trait]
pub trait BrowserBridge: Send + Sync {
    /// Acquire a fresh browser instance from the service's pool.
    async fn open_handle(&self) -> Result<HandleId, BridgeError>;

    /// Release a handle back to the pool. Closing an unknown handle is a
    /// no-op so session teardown stays idempotent.
    async fn close_handle(&self, handle: &HandleId) -> Result<(), BridgeError>;

    async fn navigate(&self, handle: &HandleId, url: &str) -> Result<Value, BridgeError>;

    async fn click(&self, handle: &HandleId, selector: &str) -> Result<Value, BridgeError>;

    async fn type_text(
        &self,
        handle: &HandleId,
        selector: &str,
        text: &str,
    ) -> Result<Value, BridgeError>;

    /// Structured extraction keyed by data type (text | links | images | forms).
    async fn extract(&self, handle: &HandleId, data_type: &str) -> Result<Value, BridgeError>;

    async fn scroll(
        &self,
        handle: &HandleId,
        direction: ScrollDirection,
        amount: i64,
    ) -> Result<Value, BridgeError>;

    async fn wait(
        &self,
        handle: &HandleId,
        condition: &str,
        timeout_ms: u64,
    ) -> Result<Value, BridgeError>;

    async fn screenshot(&self, handle: &HandleId) -> Result<ScreenshotRef, BridgeError>;

    async fn fill_form(
        &self,
        handle: &HandleId,
        fields: &BTreeMap<String, String>,
    ) -> Result<Value, BridgeError>;

    async fn download(&self, handle: &HandleId, url: &str) -> Result<FileRef, BridgeError>;

    async fn upload(
        &self,
        handle: &HandleId,
        selector: &str,
        file: &FileRef,
    ) -> Result<Value, BridgeError>;
}
