//! The agent facade: the host-facing surface of the core.
//!
//! `submit_intent` runs the whole pipeline (normalize, plan against context
//! and memory, execute, aggregate) for one session; `abort_session` cancels
//! whatever is in flight. One call may suspend across many external calls,
//! but the caller sees a single response record.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use browser_bridge::BrowserBridge;
use command_core::Normalizer;
use step_flow::metrics::EngineMetricsSnapshot;
use step_flow::{aggregate, Response, StepFlowEngine};
use voxpilot_context_store::{ContextStore, InMemoryContextStore, TurnRecord};
use voxpilot_core_types::{Command, SessionId, StepStatus, WorkflowStatus};
use voxpilot_memory_store::{InMemoryMemoryStore, MemoryStats, MemoryStore};
use voxpilot_registry::{RegistryImpl, SessionCtx, SessionRegistry};
use workflow_planner::{PlannerContext, WorkflowPlanner};

use crate::config::VoxConfig;
use crate::errors::AgentError;

#[derive(Debug, Serialize)]
pub struct SessionStats {
    pub session: SessionId,
    pub turns: u64,
    pub context_entries: usize,
    pub workflows_completed: usize,
    pub memory: MemoryStats,
    pub engine: EngineMetricsSnapshot,
}

pub struct Agent {
    normalizer: Normalizer,
    planner: WorkflowPlanner,
    registry: Arc<dyn SessionRegistry>,
    context: Arc<dyn ContextStore>,
    memory: Arc<dyn MemoryStore>,
    engine: StepFlowEngine,
    config: VoxConfig,
}

impl Agent {
    pub fn new(bridge: Arc<dyn BrowserBridge>, config: VoxConfig) -> Self {
        let context: Arc<dyn ContextStore> =
            Arc::new(InMemoryContextStore::new(config.context_ttl()));
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::with_default_embedder(
            config.memory_capacity,
        ));
        let registry: Arc<dyn SessionRegistry> = Arc::new(RegistryImpl::new(bridge.clone()));
        let engine = StepFlowEngine::new(
            bridge,
            Arc::clone(&context),
            Arc::clone(&memory),
            config.engine(),
        );
        Self {
            normalizer: Normalizer::new(config.confidence_threshold),
            planner: WorkflowPlanner::new(),
            registry,
            context,
            memory,
            engine,
            config,
        }
    }

    /// Run one raw intent record through the full pipeline. The session is
    /// created on its first intent. Execution failures come back inside the
    /// response; only pre-execution errors (parse, validation, planning) and
    /// resource exhaustion fail the call itself.
    pub async fn submit_intent(
        &self,
        session: &SessionId,
        raw: &Value,
    ) -> Result<Response, AgentError> {
        self.registry.ensure_session(session).await?;
        if let Err(err) = self
            .context
            .push_turn(session, json!({ "intent": raw }))
            .await
        {
            warn!(session = %session, error = %err, "turn record failed; continuing");
        }

        let commands = self.normalizer.normalize(raw)?;
        let planner_ctx = self.build_planner_context(session, &commands).await;
        let mut workflow = self
            .planner
            .plan(session.clone(), &commands, &planner_ctx)?;
        info!(
            session = %session,
            workflow = %workflow.id,
            steps = workflow.steps.len(),
            "planned workflow"
        );

        let lease = self
            .registry
            .begin_workflow(session, workflow.id.clone())
            .await?;
        let status = self.engine.execute(&mut workflow, &lease).await;
        self.registry.finish_workflow(session, &workflow.id).await;

        // an aborted session's context is already torn down; writing the
        // result turn would resurrect it
        if status != WorkflowStatus::Aborted {
            let succeeded = workflow
                .steps
                .iter()
                .filter(|s| s.status == StepStatus::Succeeded)
                .count();
            let summary = format!(
                "workflow with {} steps finished {:?}, {} succeeded",
                workflow.steps.len(),
                status,
                succeeded
            );
            if let Err(err) = self
                .memory
                .store(
                    session,
                    &summary,
                    json!({ "workflow": workflow.id.0, "status": status }),
                )
                .await
            {
                warn!(session = %session, error = %err, "workflow memory write failed; continuing");
            }
            if let Err(err) = self
                .context
                .push_turn(
                    session,
                    json!({ "workflow": workflow.id.0, "status": status }),
                )
                .await
            {
                warn!(session = %session, error = %err, "turn record failed; continuing");
            }
        }

        Ok(aggregate(&workflow))
    }

    /// Cancel the in-flight workflow (if any), release the browser handle,
    /// and drop session context. Idempotent.
    pub async fn abort_session(&self, session: &SessionId) -> bool {
        let aborted = self.registry.abort(session).await;
        if aborted {
            if let Err(err) = self.context.end_session(session).await {
                warn!(session = %session, error = %err, "context teardown failed");
            }
        }
        aborted
    }

    pub async fn session_stats(&self, session: &SessionId) -> Result<SessionStats, AgentError> {
        let ctx = self.registry.session_get(session).await?;
        let context_stats = self.context.stats(session).await.unwrap_or_default();
        let memory_stats = self.memory.stats().await.unwrap_or_default();
        Ok(SessionStats {
            session: session.clone(),
            turns: context_stats.turns,
            context_entries: context_stats.entries,
            workflows_completed: ctx.history.len(),
            memory: memory_stats,
            engine: step_flow::metrics::snapshot(),
        })
    }

    pub async fn session_list(&self) -> Vec<SessionCtx> {
        self.registry.session_list().await
    }

    /// Most recent conversation turns for a session, newest first. Hosts use
    /// this to rebuild dialogue context for their own rendering.
    pub async fn recent_turns(&self, session: &SessionId, limit: usize) -> Vec<TurnRecord> {
        self.context
            .recent_turns(session, limit)
            .await
            .unwrap_or_default()
    }

    /// End sessions idle past the configured TTL, dropping their context.
    pub async fn sweep_idle(&self) -> Vec<SessionId> {
        let swept = self.registry.sweep_idle(self.config.session_idle()).await;
        for session in &swept {
            if let Err(err) = self.context.end_session(session).await {
                warn!(session = %session, error = %err, "context teardown failed");
            }
        }
        swept
    }

    async fn build_planner_context(
        &self,
        session: &SessionId,
        commands: &[Command],
    ) -> PlannerContext {
        let context = match self.context.snapshot(session).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(session = %session, error = %err, "context snapshot failed; planning without it");
                Default::default()
            }
        };
        let memory = match self
            .memory
            .query(&memory_query(commands), self.config.memory_top_k)
            .await
        {
            Ok(ranked) => ranked.into_iter().map(|r| r.fact.content).collect(),
            Err(err) => {
                warn!(session = %session, error = %err, "memory query failed; planning without it");
                Vec::new()
            }
        };
        PlannerContext { context, memory }
    }
}

/// Keywords the memory layer ranks against: command types plus their salient
/// text parameters.
fn memory_query(commands: &[Command]) -> String {
    let mut parts: Vec<String> = Vec::new();
    for command in commands {
        parts.push(command.command_type.as_str().to_ascii_lowercase());
        for key in ["text", "url", "data_type"] {
            if let Some(value) = command.param(key) {
                parts.push(value.to_string());
            }
        }
    }
    parts.join(" ")
}
