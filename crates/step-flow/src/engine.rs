use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use browser_bridge::{BrowserBridge, BridgeError, ScrollDirection};
use voxpilot_context_store::ContextStore;
use voxpilot_core_types::{
    Command, CommandType, ErrorInfo, ExecutionResult, FileRef, HandleId, Step, StepId, StepKind,
    StepStatus, Workflow, WorkflowStatus,
};
use voxpilot_memory_store::MemoryStore;
use voxpilot_registry::WorkflowLease;

use crate::metrics;
use crate::model::{EngineConfig, StepOutcome};

/// Walks a workflow's dependency graph against one browser handle.
///
/// Mutating steps run strictly one at a time; read-only steps may fan out up
/// to `parallel_limit`. Step results land in the context store in completion
/// order, and memory-worthy outputs are persisted as facts. Context/memory
/// transport failures are logged and otherwise ignored: losing a cache write
/// must not fail a workflow.
pub struct StepFlowEngine {
    bridge: Arc<dyn BrowserBridge>,
    context: Arc<dyn ContextStore>,
    memory: Arc<dyn MemoryStore>,
    config: EngineConfig,
}

enum Attempt {
    Done(ExecutionResult),
    Failed(BridgeError),
    Cancelled,
}

impl StepFlowEngine {
    pub fn new(
        bridge: Arc<dyn BrowserBridge>,
        context: Arc<dyn ContextStore>,
        memory: Arc<dyn MemoryStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            bridge,
            context,
            memory,
            config,
        }
    }

    /// Drive `workflow` to a terminal status. Execution-phase failures stay
    /// local to their step and its dependents; this function itself cannot
    /// fail.
    pub async fn execute(&self, workflow: &mut Workflow, lease: &WorkflowLease) -> WorkflowStatus {
        workflow.status = WorkflowStatus::Running;
        metrics::record_workflow_started();
        self.write_workflow_state(lease, workflow).await;

        loop {
            if lease.cancel.is_cancelled() {
                abort_remaining(workflow);
                workflow.status = WorkflowStatus::Aborted;
                break;
            }

            propagate_skips(workflow);
            if workflow.all_terminal() {
                workflow.status = derive_status(workflow);
                break;
            }

            let ready = ready_steps(workflow);
            if ready.is_empty() {
                // acyclic plans cannot get here; fail loudly rather than spin
                warn!(workflow = %workflow.id, "no runnable steps in non-terminal workflow");
                for step in &mut workflow.steps {
                    if !step.status.is_terminal() {
                        step.status = StepStatus::Failed;
                        step.result = Some(ExecutionResult::failure(ErrorInfo::permanent(
                            "unsatisfiable dependencies",
                        )));
                        metrics::record_step_failed();
                    }
                }
                continue;
            }

            let first_parallel = workflow
                .step(&ready[0])
                .map(Step::is_parallel_safe)
                .unwrap_or(false);
            if self.config.parallel_limit > 1 && first_parallel {
                let batch: Vec<StepId> = ready
                    .iter()
                    .filter(|id| {
                        workflow
                            .step(id)
                            .map(Step::is_parallel_safe)
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect();
                self.run_parallel(workflow, &batch, lease).await;
            } else {
                self.run_one(workflow, &ready[0], lease).await;
            }
        }

        // an aborted session's context is torn down by the abort; writing
        // the final state would resurrect it
        if workflow.status != WorkflowStatus::Aborted {
            self.write_workflow_state(lease, workflow).await;
        }
        info!(workflow = %workflow.id, status = ?workflow.status, "workflow finished");
        workflow.status
    }

    /// Run one step to its terminal state with live status transitions.
    async fn run_one(&self, workflow: &mut Workflow, id: &StepId, lease: &WorkflowLease) {
        let resolved = match resolve_params(workflow, id) {
            Ok(resolved) => resolved,
            Err(info) => {
                if let Some(step) = workflow.step_mut(id) {
                    step.status = StepStatus::Failed;
                    step.result = Some(ExecutionResult::failure(info));
                }
                metrics::record_step_failed();
                return;
            }
        };

        let command = match workflow.step(id).map(|s| s.kind.clone()) {
            Some(StepKind::Action(command)) => command,
            Some(StepKind::Barrier) => {
                // joins fire as soon as their dependencies are satisfied
                if let Some(step) = workflow.step_mut(id) {
                    step.status = StepStatus::Succeeded;
                    step.result = Some(ExecutionResult::success(BTreeMap::new()));
                }
                return;
            }
            None => return,
        };

        if let Some(step) = workflow.step_mut(id) {
            step.status = StepStatus::Running;
        }

        let mut attempts = 0u32;
        let outcome = loop {
            attempts += 1;
            metrics::record_step_started();
            let attempt = attempt_once(
                self.bridge.as_ref(),
                &lease.cancel,
                self.config.step_timeout,
                &lease.handle,
                &command,
                &resolved,
            )
            .await;

            match attempt {
                Attempt::Done(result) => {
                    break StepOutcome {
                        id: id.clone(),
                        status: StepStatus::Succeeded,
                        attempts,
                        result: Some(result),
                    }
                }
                Attempt::Cancelled => {
                    break StepOutcome {
                        id: id.clone(),
                        status: StepStatus::Aborted,
                        attempts,
                        result: None,
                    }
                }
                Attempt::Failed(err)
                    if err.is_transient() && attempts < self.config.max_attempts =>
                {
                    warn!(step = %id, attempt = attempts, error = %err, "transient failure, backing off");
                    if let Some(step) = workflow.step_mut(id) {
                        step.status = StepStatus::Retrying;
                    }
                    metrics::record_retry();
                    let delay = backoff_delay(&self.config, attempts);
                    tokio::select! {
                        _ = lease.cancel.cancelled() => {
                            break StepOutcome {
                                id: id.clone(),
                                status: StepStatus::Aborted,
                                attempts,
                                result: None,
                            }
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    if let Some(step) = workflow.step_mut(id) {
                        step.status = StepStatus::Running;
                    }
                }
                Attempt::Failed(err) => {
                    warn!(step = %id, attempts, error = %err, "step failed");
                    break StepOutcome {
                        id: id.clone(),
                        status: StepStatus::Failed,
                        attempts,
                        result: Some(ExecutionResult::failure((&err).into())),
                    };
                }
            }
        };

        self.apply_outcome(workflow, outcome, Some(&command), lease)
            .await;
    }

    /// Fan read-only steps out across worker tasks, bounded by the
    /// configured limit; outcomes apply in completion order.
    async fn run_parallel(&self, workflow: &mut Workflow, batch: &[StepId], lease: &WorkflowLease) {
        let slots = Arc::new(Semaphore::new(self.config.parallel_limit));
        let mut tasks: JoinSet<StepOutcome> = JoinSet::new();
        let mut commands: HashMap<StepId, Command> = HashMap::new();

        for id in batch {
            let resolved = match resolve_params(workflow, id) {
                Ok(resolved) => resolved,
                Err(info) => {
                    if let Some(step) = workflow.step_mut(id) {
                        step.status = StepStatus::Failed;
                        step.result = Some(ExecutionResult::failure(info));
                    }
                    metrics::record_step_failed();
                    continue;
                }
            };
            let command = match workflow.step(id).and_then(|s| s.command()).cloned() {
                Some(command) => command,
                None => {
                    if let Some(step) = workflow.step_mut(id) {
                        step.status = StepStatus::Succeeded;
                        step.result = Some(ExecutionResult::success(BTreeMap::new()));
                    }
                    continue;
                }
            };
            if let Some(step) = workflow.step_mut(id) {
                step.status = StepStatus::Running;
            }
            commands.insert(id.clone(), command.clone());

            let bridge = Arc::clone(&self.bridge);
            let config = self.config.clone();
            let cancel = lease.cancel.clone();
            let handle = lease.handle.clone();
            let slots = Arc::clone(&slots);
            let id = id.clone();
            tasks.spawn(async move {
                let _permit = slots.acquire_owned().await;
                run_detached(bridge, config, cancel, handle, id, command, resolved).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    let command = commands.get(&outcome.id).cloned();
                    self.apply_outcome(workflow, outcome, command.as_ref(), lease)
                        .await;
                }
                Err(err) => warn!(error = %err, "step worker task failed"),
            }
        }
    }

    async fn apply_outcome(
        &self,
        workflow: &mut Workflow,
        outcome: StepOutcome,
        command: Option<&Command>,
        lease: &WorkflowLease,
    ) {
        match outcome.status {
            StepStatus::Succeeded => metrics::record_step_succeeded(),
            StepStatus::Failed => metrics::record_step_failed(),
            StepStatus::Aborted => metrics::record_step_aborted(),
            _ => {}
        }
        let id = outcome.id.clone();
        if let Some(step) = workflow.step_mut(&id) {
            step.status = outcome.status;
            step.attempts = outcome.attempts;
            step.result = outcome.result;
        }
        if let (StepStatus::Succeeded, Some(command)) = (outcome.status, command) {
            let result = workflow.step(&id).and_then(|s| s.result.clone());
            if let Some(result) = result {
                self.write_back(lease, &id, command, &result).await;
            }
        }
    }

    /// Push a successful step's output into the session context and, for
    /// memory-worthy commands, into the long-term memory layer. Failures in
    /// either transport are logged and swallowed.
    async fn write_back(
        &self,
        lease: &WorkflowLease,
        id: &StepId,
        command: &Command,
        result: &ExecutionResult,
    ) {
        let output = match &result.output {
            Some(output) => output.clone(),
            None => BTreeMap::new(),
        };

        let mut patch: BTreeMap<String, Value> = BTreeMap::new();
        patch.insert(format!("step:{id}"), json!(output));
        if let Some(url) = output.get("url") {
            patch.insert("current_url".to_string(), url.clone());
        }
        if let Some(title) = output.get("title") {
            patch.insert("last_title".to_string(), title.clone());
        }
        if let Err(err) = self.context.merge(&lease.session, patch, None).await {
            warn!(step = %id, error = %err, "context write failed; continuing");
        }

        if command.command_type.is_memory_worthy() && !output.is_empty() {
            let mut content = command.command_type.as_str().to_ascii_lowercase();
            if let Some(text) = command.param("text") {
                content.push(' ');
                content.push_str(text);
            }
            if let Some(data_type) = command.param("data_type") {
                content.push(' ');
                content.push_str(data_type);
            }
            if let Some(Value::String(url)) = output.get("url") {
                content.push_str(" at ");
                content.push_str(url);
            }
            if let Err(err) = self
                .memory
                .store(&lease.session, &content, json!(output))
                .await
            {
                warn!(step = %id, error = %err, "memory write failed; continuing");
            }
        }
    }

    async fn write_workflow_state(&self, lease: &WorkflowLease, workflow: &Workflow) {
        let state = json!({
            "status": workflow.status,
            "steps": workflow.steps.len(),
        });
        if let Err(err) = self
            .context
            .set(&lease.session, &format!("workflow:{}", workflow.id), state, None)
            .await
        {
            warn!(workflow = %workflow.id, error = %err, "workflow state write failed; continuing");
        }
    }
}

/// One dispatch attempt: the bridge call bounded by the step deadline,
/// racing the abort token. A blown deadline is a transient timeout.
async fn attempt_once(
    bridge: &dyn BrowserBridge,
    cancel: &CancellationToken,
    step_timeout: Duration,
    handle: &HandleId,
    command: &Command,
    params: &BTreeMap<String, String>,
) -> Attempt {
    tokio::select! {
        _ = cancel.cancelled() => Attempt::Cancelled,
        dispatched = tokio::time::timeout(step_timeout, dispatch(bridge, handle, command, params, step_timeout)) => {
            match dispatched {
                Ok(Ok(result)) => Attempt::Done(result),
                Ok(Err(err)) => Attempt::Failed(err),
                Err(_) => Attempt::Failed(BridgeError::Timeout(step_timeout.as_millis() as u64)),
            }
        }
    }
}

/// The one external operation a step performs.
async fn dispatch(
    bridge: &dyn BrowserBridge,
    handle: &HandleId,
    command: &Command,
    params: &BTreeMap<String, String>,
    step_timeout: Duration,
) -> Result<ExecutionResult, BridgeError> {
    let get = |key: &str| params.get(key).map(String::as_str);
    let target = command.target.as_deref();

    match command.command_type {
        CommandType::Navigate => {
            let url = get("url").unwrap_or_default();
            let value = bridge.navigate(handle, url).await?;
            let mut output = value_to_map(value);
            output
                .entry("url".to_string())
                .or_insert_with(|| json!(url));
            Ok(ExecutionResult::success(output))
        }
        CommandType::Search => {
            let text = get("text").unwrap_or_default();
            let selector = get("selector").unwrap_or("input[name='q']");
            let value = bridge.type_text(handle, selector, text).await?;
            let mut output = value_to_map(value);
            output.insert("query".to_string(), json!(text));
            Ok(ExecutionResult::success(output))
        }
        CommandType::Click => {
            let selector = target.or_else(|| get("selector")).unwrap_or_default();
            let value = bridge.click(handle, selector).await?;
            Ok(ExecutionResult::success(value_to_map(value)))
        }
        CommandType::Type => {
            let selector = target.or_else(|| get("selector")).unwrap_or_default();
            let text = get("text").unwrap_or_default();
            let value = bridge.type_text(handle, selector, text).await?;
            Ok(ExecutionResult::success(value_to_map(value)))
        }
        CommandType::Extract => {
            let data_type = get("data_type").unwrap_or("text");
            let value = bridge.extract(handle, data_type).await?;
            let mut output = value_to_map(value);
            output.insert("data_type".to_string(), json!(data_type));
            Ok(ExecutionResult::success(output))
        }
        CommandType::Scroll => {
            let direction = get("direction")
                .and_then(ScrollDirection::parse)
                .unwrap_or(ScrollDirection::Down);
            let amount = get("amount").and_then(|a| a.parse().ok()).unwrap_or(800);
            let value = bridge.scroll(handle, direction, amount).await?;
            Ok(ExecutionResult::success(value_to_map(value)))
        }
        CommandType::Wait => {
            let (condition, timeout_ms) = match get("seconds").and_then(|s| s.parse::<u64>().ok()) {
                Some(seconds) => ("sleep", seconds * 1000),
                None => (
                    get("condition").unwrap_or("load"),
                    step_timeout.as_millis() as u64,
                ),
            };
            let value = bridge.wait(handle, condition, timeout_ms).await?;
            Ok(ExecutionResult::success(value_to_map(value)))
        }
        CommandType::Screenshot => {
            let shot = bridge.screenshot(handle).await?;
            let output = BTreeMap::from([("screenshot".to_string(), json!(shot.0))]);
            Ok(ExecutionResult::success(output).with_screenshot(shot))
        }
        CommandType::Filter => {
            // a criterion applies as a click on the matching filter control
            let fallback = params
                .iter()
                .find(|(k, _)| k.starts_with("filter_"))
                .map(|(k, v)| format!("[data-{}='{}']", k.replace('_', "-"), v))
                .unwrap_or_default();
            let selector = target.map(str::to_string).unwrap_or(fallback);
            let value = bridge.click(handle, &selector).await?;
            let mut output = value_to_map(value);
            for (key, criterion) in params.iter().filter(|(k, _)| k.starts_with("filter_")) {
                output.insert(key.clone(), json!(criterion));
            }
            Ok(ExecutionResult::success(output))
        }
        CommandType::FillForm => {
            // normally expanded by the planner; kept for directly-built plans
            let fields: BTreeMap<String, String> = get("form_data")
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or_default();
            let value = bridge.fill_form(handle, &fields).await?;
            Ok(ExecutionResult::success(value_to_map(value)))
        }
        CommandType::Download => {
            let url = get("url").unwrap_or_default();
            let file = bridge.download(handle, url).await?;
            let output = BTreeMap::from([
                ("file".to_string(), json!(file.0)),
                ("url".to_string(), json!(url)),
            ]);
            Ok(ExecutionResult::success(output))
        }
        CommandType::Upload => {
            let selector = target.or_else(|| get("selector")).unwrap_or_default();
            let file = FileRef(get("file").unwrap_or_default().to_string());
            let value = bridge.upload(handle, selector, &file).await?;
            Ok(ExecutionResult::success(value_to_map(value)))
        }
    }
}

/// Detached retry loop for fan-out steps; same policy as `run_one`, minus
/// the live status transitions on the shared workflow.
async fn run_detached(
    bridge: Arc<dyn BrowserBridge>,
    config: EngineConfig,
    cancel: CancellationToken,
    handle: HandleId,
    id: StepId,
    command: Command,
    resolved: BTreeMap<String, String>,
) -> StepOutcome {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        metrics::record_step_started();
        match attempt_once(
            bridge.as_ref(),
            &cancel,
            config.step_timeout,
            &handle,
            &command,
            &resolved,
        )
        .await
        {
            Attempt::Done(result) => {
                return StepOutcome {
                    id,
                    status: StepStatus::Succeeded,
                    attempts,
                    result: Some(result),
                }
            }
            Attempt::Cancelled => {
                return StepOutcome {
                    id,
                    status: StepStatus::Aborted,
                    attempts,
                    result: None,
                }
            }
            Attempt::Failed(err) if err.is_transient() && attempts < config.max_attempts => {
                metrics::record_retry();
                let delay = backoff_delay(&config, attempts);
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return StepOutcome {
                            id,
                            status: StepStatus::Aborted,
                            attempts,
                            result: None,
                        }
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Attempt::Failed(err) => {
                return StepOutcome {
                    id,
                    status: StepStatus::Failed,
                    attempts,
                    result: Some(ExecutionResult::failure((&err).into())),
                }
            }
        }
    }
}

fn value_to_map(value: Value) -> BTreeMap<String, Value> {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        Value::Null => BTreeMap::new(),
        other => BTreeMap::from([("value".to_string(), other)]),
    }
}

/// Exponential backoff with jitter: base * 2^(attempt-1), capped, plus up to
/// `jitter_ratio` of itself.
fn backoff_delay(config: &EngineConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let base = config
        .backoff_base
        .saturating_mul(1u32 << exponent)
        .min(config.backoff_cap);
    let jitter_ms = (base.as_millis() as f64 * config.jitter_ratio) as u64;
    let jitter = if jitter_ms > 0 {
        Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    } else {
        Duration::ZERO
    };
    base + jitter
}

/// Fill `$`-referenced params from the supplying steps' outputs. A missing
/// upstream value is a permanent failure for this step.
fn resolve_params(workflow: &Workflow, id: &StepId) -> Result<BTreeMap<String, String>, ErrorInfo> {
    let step = match workflow.step(id) {
        Some(step) => step,
        None => return Ok(BTreeMap::new()),
    };
    let mut resolved = step
        .command()
        .map(|c| c.params.clone())
        .unwrap_or_default();

    for (param, output_ref) in &step.param_refs {
        let value = workflow
            .step(&output_ref.step)
            .and_then(|source| source.result.as_ref())
            .and_then(|result| result.output_value(&output_ref.key));
        match value {
            Some(Value::String(text)) => {
                resolved.insert(param.clone(), text.clone());
            }
            Some(other) => {
                resolved.insert(param.clone(), other.to_string());
            }
            None => {
                return Err(ErrorInfo::permanent(format!(
                    "missing upstream output {}.{} for param {param}",
                    output_ref.step, output_ref.key
                )));
            }
        }
    }
    Ok(resolved)
}

/// Pending steps whose dependencies are all satisfied, in plan order.
fn ready_steps(workflow: &Workflow) -> Vec<StepId> {
    let statuses: HashMap<&StepId, StepStatus> = workflow
        .steps
        .iter()
        .map(|step| (&step.id, step.status))
        .collect();
    workflow
        .steps
        .iter()
        .filter(|step| step.status == StepStatus::Pending)
        .filter(|step| {
            step.depends_on.iter().all(|dep| {
                statuses
                    .get(dep)
                    .map(|status| status.is_satisfied())
                    .unwrap_or(true)
            })
        })
        .map(|step| step.id.clone())
        .collect()
}

/// Failure propagates forward: a pending step with a failed, aborted, or
/// (transitively) skipped dependency is skipped without execution.
fn propagate_skips(workflow: &mut Workflow) {
    loop {
        let statuses: HashMap<StepId, StepStatus> = workflow
            .steps
            .iter()
            .map(|step| (step.id.clone(), step.status))
            .collect();
        let mut changed = false;
        for step in &mut workflow.steps {
            if step.status != StepStatus::Pending {
                continue;
            }
            let blocked = step.depends_on.iter().any(|dep| {
                matches!(
                    statuses.get(dep),
                    Some(StepStatus::Failed) | Some(StepStatus::Aborted) | Some(StepStatus::Skipped)
                )
            });
            if blocked {
                debug!(step = %step.id, "skipping step with failed dependency");
                step.status = StepStatus::Skipped;
                metrics::record_step_skipped();
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

fn abort_remaining(workflow: &mut Workflow) {
    for step in &mut workflow.steps {
        if !step.status.is_terminal() {
            step.status = StepStatus::Aborted;
            metrics::record_step_aborted();
        }
    }
}

/// Aggregation rule: failed beats aborted beats skipped-with-consumers;
/// otherwise the workflow succeeded.
fn derive_status(workflow: &Workflow) -> WorkflowStatus {
    if workflow
        .steps
        .iter()
        .any(|step| step.status == StepStatus::Aborted)
    {
        return WorkflowStatus::Aborted;
    }
    if workflow
        .steps
        .iter()
        .any(|step| step.status == StepStatus::Failed)
    {
        return WorkflowStatus::Failed;
    }
    let blocked_skip = workflow
        .steps
        .iter()
        .filter(|step| step.status == StepStatus::Skipped)
        .any(|step| workflow.consumers_of(&step.id).next().is_some());
    if blocked_skip {
        return WorkflowStatus::Failed;
    }
    WorkflowStatus::Succeeded
}
