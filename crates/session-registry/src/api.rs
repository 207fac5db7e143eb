use async_trait::async_trait;
use chrono::Duration;

use voxpilot_core_types::{SessionId, WorkflowId};

use crate::errors::RegistryError;
use crate::model::{SessionCtx, WorkflowLease};

#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Fetch an existing session or open one under `id`, acquiring a
    /// browser handle from the pool. Sessions are created on first intent.
    async fn ensure_session(&self, id: &SessionId) -> Result<SessionCtx, RegistryError>;

    async fn session_get(&self, id: &SessionId) -> Result<SessionCtx, RegistryError>;

    /// Claim the session for one workflow. Fails with `WorkflowInFlight`
    /// while another workflow holds the lease.
    async fn begin_workflow(
        &self,
        id: &SessionId,
        workflow: WorkflowId,
    ) -> Result<WorkflowLease, RegistryError>;

    async fn finish_workflow(&self, id: &SessionId, workflow: &WorkflowId);

    /// Cancel whatever is in flight and release the browser handle.
    /// Idempotent: aborting an unknown or already-ended session is a no-op.
    async fn abort(&self, id: &SessionId) -> bool;

    /// Drop the session record entirely, releasing its handle.
    async fn session_end(&self, id: &SessionId);

    async fn session_list(&self) -> Vec<SessionCtx>;

    /// End sessions idle past `max_idle`. Returns the swept ids.
    async fn sweep_idle(&self, max_idle: Duration) -> Vec<SessionId>;
}
