use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use browser_bridge::BrowserBridge;
use voxpilot_core_types::{SessionId, WorkflowId};

use crate::api::SessionRegistry;
use crate::errors::RegistryError;
use crate::model::{LifeState, SessionCtx, WorkflowLease};

struct SessionEntry {
    ctx: SessionCtx,
    cancel: CancellationToken,
}

/// In-memory registry. The browser service's pool is the real scarce
/// resource; this map only tracks which session owns which handle.
pub struct RegistryImpl {
    bridge: Arc<dyn BrowserBridge>,
    sessions: DashMap<SessionId, Arc<RwLock<SessionEntry>>>,
}

impl RegistryImpl {
    pub fn new(bridge: Arc<dyn BrowserBridge>) -> Self {
        Self {
            bridge,
            sessions: DashMap::new(),
        }
    }

    fn entry(&self, id: &SessionId) -> Result<Arc<RwLock<SessionEntry>>, RegistryError> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RegistryError::NotFound(id.0.clone()))
    }

    async fn release_handle(&self, ctx: &SessionCtx) {
        if let Err(err) = self.bridge.close_handle(&ctx.handle).await {
            warn!(session = %ctx.id, error = %err, "failed to release browser handle");
        }
    }
}

#[async_trait]
impl SessionRegistry for RegistryImpl {
    async fn ensure_session(&self, id: &SessionId) -> Result<SessionCtx, RegistryError> {
        if let Some(entry) = self.sessions.get(id) {
            let guard = entry.value().read();
            if guard.ctx.state != LifeState::Ended {
                return Ok(guard.ctx.clone());
            }
            return Err(RegistryError::SessionEnded(id.0.clone()));
        }

        let handle = self
            .bridge
            .open_handle()
            .await
            .map_err(|err| RegistryError::HandleUnavailable(err.to_string()))?;
        let ctx = SessionCtx::new(id.clone(), handle);
        info!(session = %id, handle = %ctx.handle, "opened browser session");
        self.sessions.insert(
            id.clone(),
            Arc::new(RwLock::new(SessionEntry {
                ctx: ctx.clone(),
                cancel: CancellationToken::new(),
            })),
        );
        Ok(ctx)
    }

    async fn session_get(&self, id: &SessionId) -> Result<SessionCtx, RegistryError> {
        Ok(self.entry(id)?.read().ctx.clone())
    }

    async fn begin_workflow(
        &self,
        id: &SessionId,
        workflow: WorkflowId,
    ) -> Result<WorkflowLease, RegistryError> {
        let entry = self.entry(id)?;
        let mut guard = entry.write();
        match guard.ctx.state {
            LifeState::Ended => return Err(RegistryError::SessionEnded(id.0.clone())),
            LifeState::Busy => return Err(RegistryError::WorkflowInFlight(id.0.clone())),
            LifeState::Idle => {}
        }
        if guard.ctx.in_flight.is_some() {
            return Err(RegistryError::WorkflowInFlight(id.0.clone()));
        }

        let cancel = CancellationToken::new();
        guard.cancel = cancel.clone();
        guard.ctx.state = LifeState::Busy;
        guard.ctx.in_flight = Some(workflow.clone());
        guard.ctx.last_active_at = Utc::now();
        Ok(WorkflowLease {
            session: id.clone(),
            workflow,
            handle: guard.ctx.handle.clone(),
            cancel,
        })
    }

    async fn finish_workflow(&self, id: &SessionId, workflow: &WorkflowId) {
        if let Ok(entry) = self.entry(id) {
            let mut guard = entry.write();
            if guard.ctx.in_flight.as_ref() == Some(workflow) {
                guard.ctx.in_flight = None;
                guard.ctx.history.push(workflow.clone());
                if guard.ctx.state == LifeState::Busy {
                    guard.ctx.state = LifeState::Idle;
                }
                guard.ctx.last_active_at = Utc::now();
            }
        }
    }

    async fn abort(&self, id: &SessionId) -> bool {
        let entry = match self.entry(id) {
            Ok(entry) => entry,
            Err(_) => return false,
        };
        let ctx = {
            let mut guard = entry.write();
            if guard.ctx.state == LifeState::Ended {
                return false;
            }
            guard.cancel.cancel();
            guard.ctx.state = LifeState::Ended;
            if let Some(workflow) = guard.ctx.in_flight.take() {
                guard.ctx.history.push(workflow);
            }
            guard.ctx.clone()
        };
        info!(session = %id, "aborting session");
        self.release_handle(&ctx).await;
        true
    }

    async fn session_end(&self, id: &SessionId) {
        if let Some((_, entry)) = self.sessions.remove(id) {
            let ctx = {
                let mut guard = entry.write();
                guard.cancel.cancel();
                guard.ctx.state = LifeState::Ended;
                guard.ctx.clone()
            };
            info!(session = %id, "ended browser session");
            self.release_handle(&ctx).await;
        }
    }

    async fn session_list(&self) -> Vec<SessionCtx> {
        self.sessions
            .iter()
            .map(|entry| entry.value().read().ctx.clone())
            .collect()
    }

    async fn sweep_idle(&self, max_idle: Duration) -> Vec<SessionId> {
        let cutoff = Utc::now() - max_idle;
        let stale: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| {
                let guard = entry.value().read();
                guard.ctx.state != LifeState::Busy && guard.ctx.last_active_at < cutoff
            })
            .map(|entry| entry.key().clone())
            .collect();
        for id in &stale {
            self.session_end(id).await;
        }
        stale
    }
}
