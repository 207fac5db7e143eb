//! Result aggregation: terminal step results in, one response record out.
//! Pure function of the workflow; no side effects.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use voxpilot_core_types::{
    CommandType, ErrorInfo, ScreenshotRef, SessionId, StepId, StepStatus, Workflow, WorkflowId,
    WorkflowStatus,
};

/// One line of the response per step, in plan order.
#[derive(Clone, Debug, Serialize)]
pub struct StepSummary {
    pub step: StepId,
    /// None for synthetic join steps.
    pub command: Option<CommandType>,
    pub status: StepStatus,
    pub attempts: u32,
    pub low_confidence: bool,
    pub error: Option<ErrorInfo>,
}

/// What `submit_intent` hands back to the caller, also on partial failure.
#[derive(Clone, Debug, Serialize)]
pub struct Response {
    pub workflow: WorkflowId,
    pub session: SessionId,
    pub status: WorkflowStatus,
    pub summaries: Vec<StepSummary>,
    /// Extracted data merged across steps; later steps win key collisions.
    pub data: BTreeMap<String, Value>,
    pub screenshots: Vec<ScreenshotRef>,
}

impl Response {
    pub fn succeeded(&self) -> bool {
        self.status == WorkflowStatus::Succeeded
    }
}

pub fn aggregate(workflow: &Workflow) -> Response {
    let mut data: BTreeMap<String, Value> = BTreeMap::new();
    let mut screenshots: Vec<ScreenshotRef> = Vec::new();

    let summaries = workflow
        .steps
        .iter()
        .map(|step| {
            if let Some(result) = &step.result {
                if let Some(output) = &result.output {
                    for (key, value) in output {
                        data.insert(key.clone(), value.clone());
                    }
                }
                if let Some(shot) = &result.screenshot {
                    screenshots.push(shot.clone());
                }
            }
            StepSummary {
                step: step.id.clone(),
                command: step.command().map(|c| c.command_type),
                status: step.status,
                attempts: step.attempts,
                low_confidence: step.command().map(|c| c.low_confidence).unwrap_or(false),
                error: step.result.as_ref().and_then(|r| r.error.clone()),
            }
        })
        .collect();

    Response {
        workflow: workflow.id.clone(),
        session: workflow.session.clone(),
        status: workflow.status,
        summaries,
        data,
        screenshots,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use voxpilot_core_types::{Command, ExecutionResult, Step};

    fn succeeded_step(id: StepId, ty: CommandType, output: &[(&str, Value)]) -> Step {
        let mut step = Step::action(id, Command::new(ty));
        step.status = StepStatus::Succeeded;
        step.result = Some(ExecutionResult::success(
            output
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        ));
        step
    }

    #[test]
    fn later_steps_win_key_collisions() {
        let first = succeeded_step(
            StepId::indexed(1),
            CommandType::Navigate,
            &[("url", json!("https://a.example"))],
        );
        let second = succeeded_step(
            StepId::indexed(2),
            CommandType::Navigate,
            &[("url", json!("https://b.example"))],
        );
        let mut workflow = Workflow::new(SessionId::new(), vec![first, second]);
        workflow.status = WorkflowStatus::Succeeded;

        let response = aggregate(&workflow);
        assert_eq!(response.data["url"], json!("https://b.example"));
    }

    #[test]
    fn screenshots_collect_and_failures_stay_visible() {
        let mut shot = succeeded_step(StepId::indexed(1), CommandType::Screenshot, &[]);
        shot.result = Some(
            ExecutionResult::success(BTreeMap::new())
                .with_screenshot(ScreenshotRef("shot-0".into())),
        );
        let mut failed = Step::action(
            StepId::indexed(2),
            Command::new(CommandType::Click).with_target("#gone"),
        );
        failed.status = StepStatus::Failed;
        failed.attempts = 1;
        failed.result = Some(ExecutionResult::failure(ErrorInfo::permanent(
            "element not found",
        )));
        let mut workflow = Workflow::new(SessionId::new(), vec![shot, failed]);
        workflow.status = WorkflowStatus::Failed;

        let response = aggregate(&workflow);
        assert!(!response.succeeded());
        assert_eq!(response.screenshots, vec![ScreenshotRef("shot-0".into())]);
        assert_eq!(response.summaries[1].status, StepStatus::Failed);
        assert!(response.summaries[1].error.is_some());
    }

    #[test]
    fn summaries_follow_plan_order_not_completion_order() {
        let mut late = succeeded_step(StepId::indexed(1), CommandType::Extract, &[]);
        late.attempts = 3;
        let early = succeeded_step(StepId::indexed(2), CommandType::Screenshot, &[]);
        let workflow = Workflow::new(SessionId::new(), vec![late, early]);

        let response = aggregate(&workflow);
        let ids: Vec<&StepId> = response.summaries.iter().map(|s| &s.step).collect();
        assert_eq!(ids, vec![&StepId::indexed(1), &StepId::indexed(2)]);
        assert_eq!(response.summaries[0].attempts, 3);
    }
}
