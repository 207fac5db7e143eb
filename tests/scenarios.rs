//! End-to-end scenarios through the full agent pipeline against the
//! scripted mock bridge.

use std::sync::Arc;

use serde_json::json;

use browser_bridge::BridgeError;
use serial_test::serial;
use voxpilot::{Agent, AgentError, MockBridge, SessionId, VoxConfig, WorkflowStatus};

fn fast_config() -> VoxConfig {
    VoxConfig {
        backoff_ms: 1,
        backoff_cap_ms: 5,
        jitter_ratio: 0.0,
        step_timeout_ms: 2_000,
        ..VoxConfig::default()
    }
}

fn agent_with_bridge() -> (Arc<MockBridge>, Agent) {
    let bridge = Arc::new(MockBridge::new());
    let agent = Agent::new(bridge.clone(), fast_config());
    (bridge, agent)
}

#[tokio::test]
async fn go_to_google_runs_one_navigate_step() {
    let (_, agent) = agent_with_bridge();
    let session = SessionId::new();

    let response = agent
        .submit_intent(
            &session,
            &json!({
                "intent": "NAVIGATE",
                "confidence": 0.97,
                "parameters": { "target": "google.com" }
            }),
        )
        .await
        .unwrap();

    assert_eq!(response.status, WorkflowStatus::Succeeded);
    assert_eq!(response.summaries.len(), 1);
    assert_eq!(response.summaries[0].attempts, 1);
    assert_eq!(response.data["url"], json!("https://google.com/"));
}

#[tokio::test]
async fn search_then_screenshot_is_sequential_and_collects_both() {
    let (bridge, agent) = agent_with_bridge();
    let session = SessionId::new();

    let response = agent
        .submit_intent(
            &session,
            &json!([
                { "intent": "SEARCH", "parameters": { "text": "Python tutorials" } },
                { "intent": "SCREENSHOT" }
            ]),
        )
        .await
        .unwrap();

    assert_eq!(response.status, WorkflowStatus::Succeeded);
    assert_eq!(response.screenshots.len(), 1);
    assert_eq!(response.data["query"], json!("Python tutorials"));

    // the search ran before the screenshot
    let ops: Vec<String> = bridge.calls().into_iter().map(|(op, _)| op).collect();
    let type_pos = ops.iter().position(|op| op == "type_text").unwrap();
    let shot_pos = ops.iter().position(|op| op == "screenshot").unwrap();
    assert!(type_pos < shot_pos);
}

#[tokio::test]
async fn failed_form_field_skips_submit_but_reports_the_rest() {
    let (bridge, agent) = agent_with_bridge();
    let session = SessionId::new();

    // fields fill in name order, so the email field is first to type
    bridge.fail_next(
        "type_text",
        BridgeError::ElementNotFound("[name='email']".into()),
    );

    let response = agent
        .submit_intent(
            &session,
            &json!([
                {
                    "intent": "FILL_FORM",
                    "parameters": {
                        "form_data": { "name": "Ada Lovelace", "email": "ada@example.com" }
                    }
                },
                { "intent": "CLICK", "parameters": { "selector": "#submit" } }
            ]),
        )
        .await
        .unwrap();

    assert_eq!(response.status, WorkflowStatus::Failed);

    let by_id = |suffix: &str| {
        response
            .summaries
            .iter()
            .find(|s| s.step.0.ends_with(suffix))
            .unwrap()
    };
    assert_eq!(
        by_id("step-1.email").status,
        voxpilot_core_types::StepStatus::Failed
    );
    assert_eq!(
        by_id("step-1.name").status,
        voxpilot_core_types::StepStatus::Succeeded
    );
    assert_eq!(
        by_id("step-1.join").status,
        voxpilot_core_types::StepStatus::Skipped
    );
    assert_eq!(
        by_id("step-2").status,
        voxpilot_core_types::StepStatus::Skipped
    );
    // the name field's result is still in the merged data
    assert_eq!(response.data["typed"], json!("Ada Lovelace"));
    assert_eq!(bridge.call_count("click"), 0);
}

#[tokio::test]
async fn transient_navigate_errors_retry_to_success() {
    let (bridge, agent) = agent_with_bridge();
    let session = SessionId::new();

    bridge.fail_next("navigate", BridgeError::Timeout(50));
    bridge.fail_next("navigate", BridgeError::Network("connection reset".into()));

    let response = agent
        .submit_intent(
            &session,
            &json!({ "intent": "NAVIGATE", "parameters": { "url": "https://example.com" } }),
        )
        .await
        .unwrap();

    assert_eq!(response.status, WorkflowStatus::Succeeded);
    assert_eq!(response.summaries[0].attempts, 3);
}

#[tokio::test]
async fn aborting_twice_matches_aborting_once() {
    let (bridge, agent) = agent_with_bridge();
    let session = SessionId::new();

    agent
        .submit_intent(
            &session,
            &json!({ "intent": "NAVIGATE", "parameters": { "url": "https://example.com" } }),
        )
        .await
        .unwrap();

    assert!(agent.abort_session(&session).await);
    let after_first: Vec<_> = agent.session_list().await;
    let handles_after_first = bridge.open_handles();

    assert!(!agent.abort_session(&session).await);
    let after_second: Vec<_> = agent.session_list().await;

    assert_eq!(after_first.len(), after_second.len());
    assert_eq!(after_first[0].state, after_second[0].state);
    assert_eq!(handles_after_first, bridge.open_handles());
    assert_eq!(handles_after_first, 0);

    // aborting a session that never existed is also a no-op
    assert!(!agent.abort_session(&SessionId::new()).await);
}

#[tokio::test]
async fn context_carries_across_intents_in_a_session() {
    let (_, agent) = agent_with_bridge();
    let session = SessionId::new();

    agent
        .submit_intent(
            &session,
            &json!({ "intent": "NAVIGATE", "parameters": { "url": "https://www.google.com" } }),
        )
        .await
        .unwrap();

    // the session already has a page, so no engine navigation is injected
    let response = agent
        .submit_intent(
            &session,
            &json!({ "intent": "SEARCH", "parameters": { "text": "rust async" } }),
        )
        .await
        .unwrap();

    assert_eq!(response.status, WorkflowStatus::Succeeded);
    assert_eq!(response.summaries.len(), 1);
}

#[tokio::test]
async fn download_output_feeds_the_upload_through_a_reference() {
    let (bridge, agent) = agent_with_bridge();
    let session = SessionId::new();

    let response = agent
        .submit_intent(
            &session,
            &json!([
                { "intent": "NAVIGATE", "parameters": { "url": "https://files.example.com" } },
                { "intent": "SCROLL", "parameters": { "direction": "down" } },
                { "intent": "WAIT", "parameters": { "seconds": 1 } },
                {
                    "intent": "DOWNLOAD",
                    "parameters": { "url": "https://files.example.com/report.pdf" }
                },
                {
                    "intent": "UPLOAD",
                    "parameters": { "selector": "#attach", "file": "$step4.file" }
                }
            ]),
        )
        .await
        .unwrap();

    assert_eq!(response.status, WorkflowStatus::Succeeded);
    let ops: Vec<String> = bridge.calls().into_iter().map(|(op, _)| op).collect();
    assert_eq!(
        ops,
        vec!["navigate", "scroll", "wait", "download", "upload"]
    );
    // the downloaded file reference flowed into the upload
    assert_eq!(
        response.data["uploaded"],
        json!("file:https://files.example.com/report.pdf")
    );
}

#[tokio::test]
async fn validation_failures_produce_no_steps_or_side_effects() {
    let (bridge, agent) = agent_with_bridge();
    let session = SessionId::new();

    let err = agent
        .submit_intent(
            &session,
            &json!({ "intent": "TYPE", "parameters": { "selector": "#box" } }),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::Normalize(_)));
    assert!(bridge.calls().is_empty());
}

#[tokio::test]
async fn planning_failures_abort_before_any_browser_call() {
    let (bridge, agent) = agent_with_bridge();
    let session = SessionId::new();

    let err = agent
        .submit_intent(
            &session,
            &json!([
                { "intent": "NAVIGATE", "parameters": { "url": "$step2.url" } },
                { "intent": "SCREENSHOT" }
            ]),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::Plan(_)));
    assert!(bridge.calls().is_empty());
}

#[tokio::test]
async fn handle_exhaustion_is_fatal_to_submit() {
    let bridge = Arc::new(MockBridge::with_pool_limit(0));
    let agent = Agent::new(bridge, fast_config());

    let err = agent
        .submit_intent(
            &SessionId::new(),
            &json!({ "intent": "SCREENSHOT" }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Session(_)));
}

// engine counters in the stats snapshot are process-wide
#[tokio::test]
#[serial]
async fn session_stats_track_turns_and_workflows() {
    let (_, agent) = agent_with_bridge();
    let session = SessionId::new();

    for _ in 0..2 {
        agent
            .submit_intent(
                &session,
                &json!({ "intent": "NAVIGATE", "parameters": { "url": "https://example.com" } }),
            )
            .await
            .unwrap();
    }

    let stats = agent.session_stats(&session).await.unwrap();
    // one turn for the intent, one for the result, per submission
    assert_eq!(stats.turns, 4);
    assert_eq!(stats.workflows_completed, 2);
    assert!(stats.context_entries > 0);
}
