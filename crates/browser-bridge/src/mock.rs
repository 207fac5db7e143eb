//! Scripted in-memory bridge used by tests and the demo CLI.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::debug;

use voxpilot_core_types::{FileRef, HandleId, ScreenshotRef};

use crate::api::{BrowserBridge, ScrollDirection};
use crate::error::BridgeError;

#[derive(Debug, Default)]
struct HandleState {
    url: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Default)]
struct MockState {
    handles: HashMap<HandleId, HandleState>,
    /// Scripted failures consumed before the real response, keyed by op name.
    failures: HashMap<String, VecDeque<BridgeError>>,
    /// Canned extraction payloads keyed by data type.
    extractions: HashMap<String, Value>,
    calls: Vec<(String, HandleId)>,
}

/// Deterministic stand-in for the remote browser service.
///
/// Operations succeed with canned payloads unless a failure was scripted via
/// [`MockBridge::fail_next`]; failures are consumed in FIFO order, which is
/// how retry tests model "two timeouts, then success".
pub struct MockBridge {
    state: Mutex<MockState>,
    pool_limit: usize,
    shot_seq: AtomicU64,
}

impl MockBridge {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            pool_limit: 8,
            shot_seq: AtomicU64::new(0),
        }
    }

    pub fn with_pool_limit(limit: usize) -> Self {
        Self {
            pool_limit: limit,
            ..Self::new()
        }
    }

    /// Script `error` as the next outcome of `op` (one entry per failing
    /// attempt).
    pub fn fail_next(&self, op: &str, error: BridgeError) {
        self.state
            .lock()
            .failures
            .entry(op.to_string())
            .or_default()
            .push_back(error);
    }

    /// Replace the canned payload returned by `extract` for `data_type`.
    pub fn set_extraction(&self, data_type: &str, payload: Value) {
        self.state
            .lock()
            .extractions
            .insert(data_type.to_string(), payload);
    }

    /// Ordered (operation, handle) log of every successful dispatch attempt.
    pub fn calls(&self) -> Vec<(String, HandleId)> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(name, _)| name == op)
            .count()
    }

    pub fn open_handles(&self) -> usize {
        self.state.lock().handles.len()
    }

    fn checked(&self, op: &str, handle: &HandleId) -> Result<(), BridgeError> {
        let mut state = self.state.lock();
        if let Some(queue) = state.failures.get_mut(op) {
            if let Some(err) = queue.pop_front() {
                debug!(op, handle = %handle, error = %err, "mock bridge scripted failure");
                return Err(err);
            }
        }
        if !state.handles.contains_key(handle) {
            return Err(BridgeError::HandleClosed);
        }
        state.calls.push((op.to_string(), handle.clone()));
        Ok(())
    }

    fn title_for(url: &str) -> String {
        let host = url
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let host = host.split('/').next().unwrap_or(host);
        host.trim_start_matches("www.").to_string()
    }
}

impl Default for MockBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserBridge for MockBridge {
    async fn open_handle(&self) -> Result<HandleId, BridgeError> {
        let mut state = self.state.lock();
        if let Some(queue) = state.failures.get_mut("open_handle") {
            if let Some(err) = queue.pop_front() {
                return Err(err);
            }
        }
        if state.handles.len() >= self.pool_limit {
            return Err(BridgeError::NoHandleAvailable);
        }
        let handle = HandleId::new();
        state.handles.insert(handle.clone(), HandleState::default());
        Ok(handle)
    }

    async fn close_handle(&self, handle: &HandleId) -> Result<(), BridgeError> {
        self.state.lock().handles.remove(handle);
        Ok(())
    }

    async fn navigate(&self, handle: &HandleId, url: &str) -> Result<Value, BridgeError> {
        self.checked("navigate", handle)?;
        let title = Self::title_for(url);
        let mut state = self.state.lock();
        if let Some(ctx) = state.handles.get_mut(handle) {
            ctx.url = Some(url.to_string());
            ctx.title = Some(title.clone());
        }
        Ok(json!({ "url": url, "title": title }))
    }

    async fn click(&self, handle: &HandleId, selector: &str) -> Result<Value, BridgeError> {
        self.checked("click", handle)?;
        Ok(json!({ "clicked": selector }))
    }

    async fn type_text(
        &self,
        handle: &HandleId,
        selector: &str,
        text: &str,
    ) -> Result<Value, BridgeError> {
        self.checked("type_text", handle)?;
        Ok(json!({ "selector": selector, "typed": text }))
    }

    async fn extract(&self, handle: &HandleId, data_type: &str) -> Result<Value, BridgeError> {
        self.checked("extract", handle)?;
        let state = self.state.lock();
        if let Some(payload) = state.extractions.get(data_type) {
            return Ok(payload.clone());
        }
        let ctx = state.handles.get(handle);
        let url = ctx.and_then(|c| c.url.clone()).unwrap_or_default();
        let title = ctx.and_then(|c| c.title.clone()).unwrap_or_default();
        let payload = match data_type {
            "links" => json!({ "links": [], "count": 0 }),
            "images" => json!({ "images": [], "count": 0 }),
            "forms" => json!({ "forms": [], "count": 0 }),
            _ => json!({ "text": "", "title": title, "url": url }),
        };
        Ok(payload)
    }

    async fn scroll(
        &self,
        handle: &HandleId,
        direction: ScrollDirection,
        amount: i64,
    ) -> Result<Value, BridgeError> {
        self.checked("scroll", handle)?;
        let signed = match direction {
            ScrollDirection::Down => amount,
            ScrollDirection::Up => -amount,
        };
        Ok(json!({ "scrolled_by": signed }))
    }

    async fn wait(
        &self,
        handle: &HandleId,
        condition: &str,
        timeout_ms: u64,
    ) -> Result<Value, BridgeError> {
        self.checked("wait", handle)?;
        Ok(json!({ "condition": condition, "timeout_ms": timeout_ms }))
    }

    async fn screenshot(&self, handle: &HandleId) -> Result<ScreenshotRef, BridgeError> {
        self.checked("screenshot", handle)?;
        let seq = self.shot_seq.fetch_add(1, Ordering::Relaxed);
        Ok(ScreenshotRef(format!("shot-{seq}")))
    }

    async fn fill_form(
        &self,
        handle: &HandleId,
        fields: &BTreeMap<String, String>,
    ) -> Result<Value, BridgeError> {
        self.checked("fill_form", handle)?;
        Ok(json!({ "filled": fields.len() }))
    }

    async fn download(&self, handle: &HandleId, url: &str) -> Result<FileRef, BridgeError> {
        self.checked("download", handle)?;
        Ok(FileRef(format!("file:{url}")))
    }

    async fn upload(
        &self,
        handle: &HandleId,
        selector: &str,
        file: &FileRef,
    ) -> Result<Value, BridgeError> {
        self.checked("upload", handle)?;
        Ok(json!({ "selector": selector, "uploaded": file.0 }))
    }
}
