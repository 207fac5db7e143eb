use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use voxpilot_core_types::{HandleId, SessionId, WorkflowId};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifeState {
    /// Owns a handle, nothing in flight.
    Idle,
    /// A workflow is executing.
    Busy,
    /// Aborted or swept; the handle has been released.
    Ended,
}

/// Bookkeeping for one live session.
#[derive(Clone, Debug)]
pub struct SessionCtx {
    pub id: SessionId,
    pub handle: HandleId,
    pub state: LifeState,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub in_flight: Option<WorkflowId>,
    /// Completed workflow ids, oldest first.
    pub history: Vec<WorkflowId>,
}

impl SessionCtx {
    pub fn new(id: SessionId, handle: HandleId) -> Self {
        let now = Utc::now();
        Self {
            id,
            handle,
            state: LifeState::Idle,
            created_at: now,
            last_active_at: now,
            in_flight: None,
            history: Vec::new(),
        }
    }
}

/// What `begin_workflow` hands the engine: the session's handle plus the
/// token that aborts this workflow. The token is fresh per workflow.
#[derive(Clone, Debug)]
pub struct WorkflowLease {
    pub session: SessionId,
    pub workflow: WorkflowId,
    pub handle: HandleId,
    pub cancel: CancellationToken,
}
