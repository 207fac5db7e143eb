use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;
use tracing::debug;

use voxpilot_core_types::{
    Command, CommandType, OutputRef, SessionId, Step, StepId, Workflow,
};

use crate::errors::PlanError;

const DEFAULT_SEARCH_ENGINE: &str = "https://www.google.com/";

/// Immutable snapshots the planner reads: the session's live context entries
/// and the top-ranked memory fact contents, best first.
#[derive(Clone, Debug, Default)]
pub struct PlannerContext {
    pub context: BTreeMap<String, Value>,
    pub memory: Vec<String>,
}

impl PlannerContext {
    fn has_current_url(&self) -> bool {
        self.context.contains_key("current_url")
    }

    /// A remembered "preferred search engine ..." fact overrides the default
    /// engine; first ranked match wins, which keeps planning deterministic.
    fn preferred_search_engine(&self) -> String {
        for fact in &self.memory {
            if fact.to_ascii_lowercase().contains("search engine") {
                if let Some(url) = fact.split_whitespace().find(|t| t.starts_with("http")) {
                    return url.to_string();
                }
            }
        }
        DEFAULT_SEARCH_ENGINE.to_string()
    }
}

/// Where a `$...` parameter reference points.
enum RefTarget {
    Prev,
    Ordinal(usize),
}

fn parse_reference(value: &str) -> Option<(RefTarget, String)> {
    let body = value.strip_prefix('$')?;
    let (head, key) = body.split_once('.')?;
    if key.is_empty() {
        return None;
    }
    if head == "prev" {
        return Some((RefTarget::Prev, key.to_string()));
    }
    let ordinal = head.strip_prefix("step")?.parse::<usize>().ok()?;
    Some((RefTarget::Ordinal(ordinal), key.to_string()))
}

/// Expands commands into a workflow. Sequential commands chain; FILL_FORM
/// and FILTER fan out per field/criterion behind a synthetic join; adjacent
/// read-only commands share their predecessor's edge instead of chaining.
pub struct WorkflowPlanner;

impl WorkflowPlanner {
    pub fn new() -> Self {
        Self
    }

    pub fn plan(
        &self,
        session: SessionId,
        commands: &[Command],
        ctx: &PlannerContext,
    ) -> Result<Workflow, PlanError> {
        if commands.is_empty() {
            return Err(PlanError::EmptyPlan);
        }

        let mut steps: Vec<Step> = Vec::new();
        // tail step of each command, keyed by 1-based ordinal
        let mut tail_by_ordinal: HashMap<usize, StepId> = HashMap::new();
        let mut prev_tail: Option<StepId> = None;
        // trailing read-only steps since the last sequential tail
        let mut open_parallel: Vec<StepId> = Vec::new();

        if needs_engine_navigation(commands, ctx) {
            let engine = ctx.preferred_search_engine();
            debug!(url = %engine, "injecting search engine navigation");
            let nav = Command::new(CommandType::Navigate).with_param("url", engine);
            let step = Step::action(StepId(String::from("step-0")), nav);
            prev_tail = Some(step.id.clone());
            steps.push(step);
        }

        for (index, command) in commands.iter().enumerate() {
            let ordinal = index + 1;
            let refs = collect_refs(command, ordinal, &tail_by_ordinal)?;

            let tail = match command.command_type {
                CommandType::FillForm => plan_fill_form(
                    command,
                    ordinal,
                    &prev_tail,
                    &open_parallel,
                    &refs,
                    &mut steps,
                ),
                CommandType::Filter => plan_filter(
                    command,
                    ordinal,
                    &prev_tail,
                    &open_parallel,
                    &refs,
                    &mut steps,
                ),
                ty if ty.is_parallel_safe() => {
                    // attach to the same upstream edge as the predecessor
                    // instead of chaining behind it
                    let mut step = Step::action(StepId::indexed(ordinal), command.clone());
                    if let Some(anchor) = &prev_tail {
                        step.depends_on.insert(anchor.clone());
                    }
                    apply_refs(&mut step, &refs);
                    let id = step.id.clone();
                    steps.push(step);
                    id
                }
                _ => {
                    let mut step = Step::action(StepId::indexed(ordinal), command.clone());
                    attach_upstream(&mut step, &prev_tail, &open_parallel);
                    apply_refs(&mut step, &refs);
                    let id = step.id.clone();
                    steps.push(step);
                    id
                }
            };

            if command.command_type.is_parallel_safe() {
                open_parallel.push(tail.clone());
            } else {
                prev_tail = Some(tail.clone());
                open_parallel.clear();
            }
            tail_by_ordinal.insert(ordinal, tail);
        }

        validate_acyclic(&steps)?;
        Ok(Workflow::new(session, steps))
    }
}

impl Default for WorkflowPlanner {
    fn default() -> Self {
        Self::new()
    }
}

/// A SEARCH with no page to search on needs a navigation planned in front.
fn needs_engine_navigation(commands: &[Command], ctx: &PlannerContext) -> bool {
    if ctx.has_current_url() {
        return false;
    }
    for command in commands {
        match command.command_type {
            CommandType::Navigate => return false,
            CommandType::Search => return true,
            _ => {}
        }
    }
    false
}

/// Resolve every `$`-prefixed param of `command` to the step that will
/// supply it, or fail fast.
fn collect_refs(
    command: &Command,
    ordinal: usize,
    tail_by_ordinal: &HashMap<usize, StepId>,
) -> Result<BTreeMap<String, OutputRef>, PlanError> {
    let mut refs = BTreeMap::new();
    for (param, value) in &command.params {
        if !value.starts_with('$') {
            continue;
        }
        let unresolvable = || PlanError::UnresolvableReference {
            ordinal,
            reference: value.clone(),
        };
        let (target, key) = parse_reference(value).ok_or_else(unresolvable)?;
        let source_ordinal = match target {
            RefTarget::Prev => ordinal.checked_sub(1).ok_or_else(unresolvable)?,
            RefTarget::Ordinal(n) => n,
        };
        if source_ordinal == 0 || source_ordinal >= ordinal {
            return Err(unresolvable());
        }
        let step = tail_by_ordinal
            .get(&source_ordinal)
            .cloned()
            .ok_or_else(unresolvable)?;
        refs.insert(param.clone(), OutputRef { step, key });
    }
    Ok(refs)
}

fn apply_refs(step: &mut Step, refs: &BTreeMap<String, OutputRef>) {
    for (param, output_ref) in refs {
        if step
            .command()
            .map(|c| c.params.contains_key(param))
            .unwrap_or(false)
        {
            step.depends_on.insert(output_ref.step.clone());
            step.param_refs.insert(param.clone(), output_ref.clone());
        }
    }
}

/// One TYPE-shaped step per form field, all feeding one join barrier.
fn plan_fill_form(
    command: &Command,
    ordinal: usize,
    prev_tail: &Option<StepId>,
    open_parallel: &[StepId],
    refs: &BTreeMap<String, OutputRef>,
    steps: &mut Vec<Step>,
) -> StepId {
    let fields: BTreeMap<String, String> = command
        .param("form_data")
        .and_then(|raw| serde_json::from_str::<BTreeMap<String, Value>>(raw).ok())
        .map(|map| {
            map.into_iter()
                .map(|(k, v)| {
                    let text = match v {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (k, text)
                })
                .collect()
        })
        .unwrap_or_default();

    let mut field_ids = Vec::new();
    for (field, text) in fields {
        let field_command = Command::new(CommandType::Type)
            .with_param("text", text)
            .with_param("field", field.clone())
            .with_target(format!("[name='{field}']"))
            .with_confidence(command.confidence);
        let mut step = Step::action(StepId::field(ordinal, &field), field_command);
        attach_upstream(&mut step, prev_tail, open_parallel);
        apply_refs(&mut step, refs);
        field_ids.push(step.id.clone());
        steps.push(step);
    }

    let mut barrier = Step::barrier(StepId::join(ordinal));
    if field_ids.is_empty() {
        attach_upstream(&mut barrier, prev_tail, open_parallel);
    }
    for id in field_ids {
        barrier.depends_on.insert(id);
    }
    let barrier_id = barrier.id.clone();
    steps.push(barrier);
    barrier_id
}

/// One FILTER step per criterion, joined like a form fill.
fn plan_filter(
    command: &Command,
    ordinal: usize,
    prev_tail: &Option<StepId>,
    open_parallel: &[StepId],
    refs: &BTreeMap<String, OutputRef>,
    steps: &mut Vec<Step>,
) -> StepId {
    let shared: BTreeMap<String, String> = command
        .params
        .iter()
        .filter(|(k, _)| !k.starts_with("filter_"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut criterion_ids = Vec::new();
    for (key, value) in command.params.iter().filter(|(k, _)| k.starts_with("filter_")) {
        let label = key.trim_start_matches("filter_");
        let mut criterion = Command::new(CommandType::Filter).with_confidence(command.confidence);
        criterion.params = shared.clone();
        criterion.params.insert(key.clone(), value.clone());
        criterion.target = command.target.clone();

        let mut step = Step::action(StepId::field(ordinal, label), criterion);
        attach_upstream(&mut step, prev_tail, open_parallel);
        apply_refs(&mut step, refs);
        criterion_ids.push(step.id.clone());
        steps.push(step);
    }

    let mut barrier = Step::barrier(StepId::join(ordinal));
    if criterion_ids.is_empty() {
        attach_upstream(&mut barrier, prev_tail, open_parallel);
    }
    for id in criterion_ids {
        barrier.depends_on.insert(id);
    }
    let barrier_id = barrier.id.clone();
    steps.push(barrier);
    barrier_id
}

fn attach_upstream(step: &mut Step, prev_tail: &Option<StepId>, open_parallel: &[StepId]) {
    if open_parallel.is_empty() {
        if let Some(prev) = prev_tail {
            step.depends_on.insert(prev.clone());
        }
    } else {
        // close the read-only fan-out
        for parallel in open_parallel {
            step.depends_on.insert(parallel.clone());
        }
    }
}

/// Kahn's walk over the finished graph; construction should never produce a
/// cycle, but the planner promises to catch one rather than hang the engine.
fn validate_acyclic(steps: &[Step]) -> Result<(), PlanError> {
    let ids: HashSet<&StepId> = steps.iter().map(|s| &s.id).collect();
    let mut remaining: HashMap<&StepId, HashSet<&StepId>> = steps
        .iter()
        .map(|step| {
            let deps: HashSet<&StepId> = step
                .depends_on
                .iter()
                .filter(|dep| ids.contains(dep))
                .collect();
            (&step.id, deps)
        })
        .collect();

    while !remaining.is_empty() {
        let ready: Vec<&StepId> = remaining
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(id, _)| *id)
            .collect();
        if ready.is_empty() {
            let stuck = remaining.keys().min().map(|id| (*id).clone());
            return Err(PlanError::CircularDependency(
                stuck.unwrap_or_else(|| StepId(String::from("unknown"))),
            ));
        }
        for id in &ready {
            remaining.remove(*id);
        }
        for deps in remaining.values_mut() {
            for id in &ready {
                deps.remove(*id);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan(commands: &[Command]) -> Workflow {
        WorkflowPlanner::new()
            .plan(SessionId::new(), commands, &PlannerContext::default())
            .unwrap()
    }

    #[test]
    fn sequential_commands_chain() {
        let workflow = plan(&[
            Command::new(CommandType::Navigate).with_param("url", "https://example.com"),
            Command::new(CommandType::Click).with_target("#go"),
            Command::new(CommandType::Type)
                .with_param("text", "hi")
                .with_target("#box"),
        ]);
        assert_eq!(workflow.steps.len(), 3);
        assert!(workflow.steps[0].depends_on.is_empty());
        assert!(workflow.steps[1].depends_on.contains(&StepId::indexed(1)));
        assert!(workflow.steps[2].depends_on.contains(&StepId::indexed(2)));
    }

    #[test]
    fn fill_form_fans_out_behind_a_join() {
        let workflow = plan(&[
            Command::new(CommandType::Navigate).with_param("url", "https://example.com"),
            Command::new(CommandType::FillForm).with_param(
                "form_data",
                json!({ "name": "Ada", "email": "ada@example.com", "message": "hi" }).to_string(),
            ),
            Command::new(CommandType::Click).with_target("#submit"),
        ]);

        let fields: Vec<&Step> = workflow
            .steps
            .iter()
            .filter(|s| s.id.0.starts_with("step-2.") && !s.id.0.ends_with(".join"))
            .collect();
        assert_eq!(fields.len(), 3);
        for field in &fields {
            assert_eq!(field.depends_on.len(), 1);
            assert!(field.depends_on.contains(&StepId::indexed(1)));
        }

        let join = workflow.step(&StepId::join(2)).unwrap();
        assert_eq!(join.depends_on.len(), 3);
        let submit = workflow.step(&StepId::indexed(3)).unwrap();
        assert_eq!(
            submit.depends_on,
            std::collections::BTreeSet::from([StepId::join(2)])
        );
    }

    #[test]
    fn adjacent_extracts_share_their_anchor() {
        let workflow = plan(&[
            Command::new(CommandType::Navigate).with_param("url", "https://example.com"),
            Command::new(CommandType::Extract).with_param("data_type", "links"),
            Command::new(CommandType::Extract).with_param("data_type", "images"),
            Command::new(CommandType::Click).with_target("#next"),
        ]);

        let first = workflow.step(&StepId::indexed(2)).unwrap();
        let second = workflow.step(&StepId::indexed(3)).unwrap();
        // both hang off the navigation, not off each other
        assert!(first.depends_on.contains(&StepId::indexed(1)));
        assert!(second.depends_on.contains(&StepId::indexed(1)));
        assert!(!second.depends_on.contains(&StepId::indexed(2)));

        // the next mutating command waits for the whole fan-out
        let click = workflow.step(&StepId::indexed(4)).unwrap();
        assert!(click.depends_on.contains(&StepId::indexed(2)));
        assert!(click.depends_on.contains(&StepId::indexed(3)));
    }

    #[test]
    fn references_plan_as_edges() {
        let workflow = plan(&[
            Command::new(CommandType::Extract).with_param("data_type", "text"),
            Command::new(CommandType::Filter)
                .with_param("filter_type", "price")
                .with_param("filter_value", "$step1.price"),
        ]);

        let criterion = workflow.step(&StepId::field(2, "value")).unwrap();
        assert!(criterion.depends_on.contains(&StepId::indexed(1)));
        let output_ref = criterion.param_refs.get("filter_value").unwrap();
        assert_eq!(output_ref.step, StepId::indexed(1));
        assert_eq!(output_ref.key, "price");
    }

    #[test]
    fn forward_reference_fails_fast() {
        let err = WorkflowPlanner::new()
            .plan(
                SessionId::new(),
                &[
                    Command::new(CommandType::Navigate).with_param("url", "$step2.url"),
                    Command::new(CommandType::Screenshot),
                ],
                &PlannerContext::default(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            PlanError::UnresolvableReference { ordinal: 1, .. }
        ));
    }

    #[test]
    fn search_without_page_injects_navigation() {
        let workflow = plan(&[Command::new(CommandType::Search).with_param("text", "rust")]);
        assert_eq!(workflow.steps.len(), 2);
        assert_eq!(workflow.steps[0].id.0, "step-0");
        let nav = workflow.steps[0].command().unwrap();
        assert_eq!(nav.command_type, CommandType::Navigate);
        assert_eq!(nav.param("url"), Some(DEFAULT_SEARCH_ENGINE));
        assert!(workflow.steps[1].depends_on.contains(&workflow.steps[0].id));
    }

    #[test]
    fn remembered_engine_overrides_default() {
        let ctx = PlannerContext {
            context: BTreeMap::new(),
            memory: vec!["preferred search engine https://duckduckgo.com".to_string()],
        };
        let workflow = WorkflowPlanner::new()
            .plan(
                SessionId::new(),
                &[Command::new(CommandType::Search).with_param("text", "rust")],
                &ctx,
            )
            .unwrap();
        let nav = workflow.steps[0].command().unwrap();
        assert_eq!(nav.param("url"), Some("https://duckduckgo.com"));
    }

    #[test]
    fn current_url_suppresses_injection() {
        let ctx = PlannerContext {
            context: BTreeMap::from([(
                "current_url".to_string(),
                json!("https://www.google.com"),
            )]),
            memory: Vec::new(),
        };
        let workflow = WorkflowPlanner::new()
            .plan(
                SessionId::new(),
                &[Command::new(CommandType::Search).with_param("text", "rust")],
                &ctx,
            )
            .unwrap();
        assert_eq!(workflow.steps.len(), 1);
    }

    #[test]
    fn planning_is_deterministic() {
        let commands = vec![
            Command::new(CommandType::Navigate).with_param("url", "https://example.com"),
            Command::new(CommandType::FillForm)
                .with_param("form_data", json!({ "b": "2", "a": "1" }).to_string()),
            Command::new(CommandType::Screenshot),
        ];
        let ctx = PlannerContext::default();
        let planner = WorkflowPlanner::new();
        let first = planner.plan(SessionId("s".into()), &commands, &ctx).unwrap();
        let second = planner.plan(SessionId("s".into()), &commands, &ctx).unwrap();
        let shape = |w: &Workflow| -> Vec<(StepId, Vec<StepId>)> {
            w.steps
                .iter()
                .map(|s| (s.id.clone(), s.depends_on.iter().cloned().collect()))
                .collect()
        };
        assert_eq!(shape(&first), shape(&second));
    }

    #[test]
    fn cycle_detection_catches_handmade_cycles() {
        let a = Step::action(StepId::indexed(1), Command::new(CommandType::Screenshot))
            .depends_on(StepId::indexed(2));
        let b = Step::action(StepId::indexed(2), Command::new(CommandType::Screenshot))
            .depends_on(StepId::indexed(1));
        assert!(matches!(
            validate_acyclic(&[a, b]),
            Err(PlanError::CircularDependency(_))
        ));
    }

    #[test]
    fn empty_plan_is_rejected() {
        assert!(matches!(
            WorkflowPlanner::new().plan(SessionId::new(), &[], &PlannerContext::default()),
            Err(PlanError::EmptyPlan)
        ));
    }
}
