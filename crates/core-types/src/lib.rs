//! Shared primitives for the voxpilot kernel crates.
//!
//! Everything here is plain data: identifiers, the Command/Step/Workflow
//! model, execution results, and the error classification that drives the
//! retry policy. Behaviour lives in the sibling crates.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Step identifiers are assigned by the planner and are deterministic for a
/// given plan: `step-3`, `step-3.email`, `step-3.join`. Keeping them readable
/// makes `$stepN.key` references and log lines line up with the plan.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

impl StepId {
    pub fn indexed(ordinal: usize) -> Self {
        Self(format!("step-{ordinal}"))
    }

    pub fn field(ordinal: usize, field: &str) -> Self {
        Self(format!("step-{ordinal}.{field}"))
    }

    pub fn join(ordinal: usize) -> Self {
        Self(format!("step-{ordinal}.join"))
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct FactId(pub String);

impl FactId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Handle onto one remote browser instance. Owned by exactly one session for
/// the handle's lifetime.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct HandleId(pub String);

impl HandleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotRef(pub String);

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FileRef(pub String);

/// Closed set of browser command types. Adding a variant is an explicit,
/// reviewable change; loose upstream records never leak past normalization.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    Navigate,
    Search,
    Click,
    Type,
    Extract,
    Scroll,
    Wait,
    Screenshot,
    Filter,
    FillForm,
    Download,
    Upload,
}

impl CommandType {
    pub const ALL: [CommandType; 12] = [
        CommandType::Navigate,
        CommandType::Search,
        CommandType::Click,
        CommandType::Type,
        CommandType::Extract,
        CommandType::Scroll,
        CommandType::Wait,
        CommandType::Screenshot,
        CommandType::Filter,
        CommandType::FillForm,
        CommandType::Download,
        CommandType::Upload,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommandType::Navigate => "NAVIGATE",
            CommandType::Search => "SEARCH",
            CommandType::Click => "CLICK",
            CommandType::Type => "TYPE",
            CommandType::Extract => "EXTRACT",
            CommandType::Scroll => "SCROLL",
            CommandType::Wait => "WAIT",
            CommandType::Screenshot => "SCREENSHOT",
            CommandType::Filter => "FILTER",
            CommandType::FillForm => "FILL_FORM",
            CommandType::Download => "DOWNLOAD",
            CommandType::Upload => "UPLOAD",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let needle = raw.trim().to_ascii_uppercase();
        Self::ALL.into_iter().find(|ty| ty.as_str() == needle)
    }

    /// Read-only operations that may run alongside each other against an
    /// already-materialized page.
    pub fn is_parallel_safe(self) -> bool {
        matches!(self, CommandType::Extract | CommandType::Screenshot)
    }

    /// Results worth persisting to the long-term memory layer, as opposed to
    /// mechanical gestures.
    pub fn is_memory_worthy(self) -> bool {
        matches!(
            self,
            CommandType::Extract | CommandType::Search | CommandType::Download
        )
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed, validated action. Immutable once built by the normalizer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub command_type: CommandType,
    pub params: BTreeMap<String, String>,
    pub target: Option<String>,
    pub confidence: f32,
    /// Set when `confidence` fell below the configured threshold. The
    /// command still plans and executes; the caller decides whether to
    /// confirm first.
    pub low_confidence: bool,
}

impl Command {
    pub fn new(command_type: CommandType) -> Self {
        Self {
            command_type,
            params: BTreeMap::new(),
            target: None,
            confidence: 1.0,
            low_confidence: false,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Classification that drives the retry policy: transient errors retry with
/// backoff, permanent errors fail the step on the spot.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ErrorKind {
    Transient,
    Permanent,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ExecStatus {
    Success,
    Failure,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecStatus,
    pub output: Option<BTreeMap<String, Value>>,
    pub screenshot: Option<ScreenshotRef>,
    pub error: Option<ErrorInfo>,
}

impl ExecutionResult {
    pub fn success(output: BTreeMap<String, Value>) -> Self {
        Self {
            status: ExecStatus::Success,
            output: Some(output),
            screenshot: None,
            error: None,
        }
    }

    pub fn failure(error: ErrorInfo) -> Self {
        Self {
            status: ExecStatus::Failure,
            output: None,
            screenshot: None,
            error: Some(error),
        }
    }

    pub fn with_screenshot(mut self, screenshot: ScreenshotRef) -> Self {
        self.screenshot = Some(screenshot);
        self
    }

    pub fn output_value(&self, key: &str) -> Option<&Value> {
        self.output.as_ref().and_then(|map| map.get(key))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Retrying,
    Skipped,
    Aborted,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped | StepStatus::Aborted
        )
    }

    /// Terminal in a way that lets dependents proceed.
    pub fn is_satisfied(self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Skipped)
    }
}

/// Reference into an upstream step's output, resolved at execution time.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OutputRef {
    pub step: StepId,
    pub key: String,
}

/// What a step actually does when it runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StepKind {
    /// One browser-bridge operation derived from a command.
    Action(Command),
    /// Synthetic join point; succeeds without touching the browser once its
    /// dependencies are satisfied.
    Barrier,
}

impl StepKind {
    pub fn command(&self) -> Option<&Command> {
        match self {
            StepKind::Action(command) => Some(command),
            StepKind::Barrier => None,
        }
    }
}

/// One schedulable unit of execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub kind: StepKind,
    pub depends_on: BTreeSet<StepId>,
    pub status: StepStatus,
    pub attempts: u32,
    pub result: Option<ExecutionResult>,
    /// Param name -> upstream output supplying its value at execution time.
    pub param_refs: BTreeMap<String, OutputRef>,
}

impl Step {
    pub fn action(id: StepId, command: Command) -> Self {
        Self {
            id,
            kind: StepKind::Action(command),
            depends_on: BTreeSet::new(),
            status: StepStatus::Pending,
            attempts: 0,
            result: None,
            param_refs: BTreeMap::new(),
        }
    }

    pub fn barrier(id: StepId) -> Self {
        Self {
            id,
            kind: StepKind::Barrier,
            depends_on: BTreeSet::new(),
            status: StepStatus::Pending,
            attempts: 0,
            result: None,
            param_refs: BTreeMap::new(),
        }
    }

    pub fn depends_on(mut self, dep: StepId) -> Self {
        self.depends_on.insert(dep);
        self
    }

    pub fn command(&self) -> Option<&Command> {
        self.kind.command()
    }

    pub fn is_parallel_safe(&self) -> bool {
        match &self.kind {
            StepKind::Action(command) => command.command_type.is_parallel_safe(),
            StepKind::Barrier => true,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Succeeded | WorkflowStatus::Failed | WorkflowStatus::Aborted
        )
    }
}

/// The full dependency graph of steps for one submitted intent. Owned by
/// exactly one session while in flight.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub session: SessionId,
    /// Plan order; the scheduler walks dependencies, the aggregator reports
    /// in this order.
    pub steps: Vec<Step>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(session: SessionId, steps: Vec<Step>) -> Self {
        Self {
            id: WorkflowId::new(),
            session,
            steps,
            status: WorkflowStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|step| &step.id == id)
    }

    pub fn step_mut(&mut self, id: &StepId) -> Option<&mut Step> {
        self.steps.iter_mut().find(|step| &step.id == id)
    }

    pub fn all_terminal(&self) -> bool {
        self.steps.iter().all(|step| step.status.is_terminal())
    }

    /// Steps holding an unresolved reference into `id`'s output. Used by the
    /// aggregation rule: a skipped step only blocks overall success when
    /// someone downstream needed its output.
    pub fn consumers_of<'a>(&'a self, id: &'a StepId) -> impl Iterator<Item = &'a Step> + 'a {
        self.steps
            .iter()
            .filter(move |step| step.param_refs.values().any(|r| &r.step == id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_type_parses_wire_names() {
        assert_eq!(CommandType::parse("NAVIGATE"), Some(CommandType::Navigate));
        assert_eq!(CommandType::parse("fill_form"), Some(CommandType::FillForm));
        assert_eq!(CommandType::parse(" screenshot "), Some(CommandType::Screenshot));
        assert_eq!(CommandType::parse("TELEPORT"), None);
    }

    #[test]
    fn step_status_terminality() {
        assert!(StepStatus::Skipped.is_terminal());
        assert!(StepStatus::Skipped.is_satisfied());
        assert!(StepStatus::Failed.is_terminal());
        assert!(!StepStatus::Failed.is_satisfied());
        assert!(!StepStatus::Retrying.is_terminal());
    }

    #[test]
    fn workflow_round_trips_through_serde() {
        let session = SessionId::new();
        let a = Step::action(
            StepId::indexed(1),
            Command::new(CommandType::Navigate).with_param("url", "https://example.com"),
        );
        let mut b = Step::action(
            StepId::indexed(2),
            Command::new(CommandType::Extract).with_param("data_type", "links"),
        )
        .depends_on(StepId::indexed(1));
        b.status = StepStatus::Succeeded;
        b.attempts = 2;
        b.result = Some(ExecutionResult::success(BTreeMap::from([(
            "count".to_string(),
            serde_json::json!(3),
        )])));
        b.param_refs.insert(
            "selector".to_string(),
            OutputRef {
                step: StepId::indexed(1),
                key: "url".to_string(),
            },
        );

        let workflow = Workflow::new(session, vec![a, b]);
        let encoded = serde_json::to_string(&workflow).unwrap();
        let decoded: Workflow = serde_json::from_str(&encoded).unwrap();

        assert_eq!(workflow, decoded);
        assert_eq!(decoded.steps[1].attempts, 2);
        assert_eq!(
            decoded.steps[1].depends_on,
            BTreeSet::from([StepId::indexed(1)])
        );
    }

    #[test]
    fn consumers_see_param_refs() {
        let session = SessionId::new();
        let a = Step::action(StepId::indexed(1), Command::new(CommandType::Extract));
        let mut b = Step::action(StepId::indexed(2), Command::new(CommandType::Filter))
            .depends_on(StepId::indexed(1));
        b.param_refs.insert(
            "filter_value".to_string(),
            OutputRef {
                step: StepId::indexed(1),
                key: "price".to_string(),
            },
        );
        let workflow = Workflow::new(session, vec![a, b]);

        let step_one = StepId::indexed(1);
        let consumers: Vec<_> = workflow.consumers_of(&step_one).collect();
        assert_eq!(consumers.len(), 1);
        assert_eq!(consumers[0].id, StepId::indexed(2));
        assert_eq!(workflow.consumers_of(&StepId::indexed(2)).count(), 0);
    }
}
