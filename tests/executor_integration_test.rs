//! End-to-end executor scenarios: straight-line runs, retries, score
//! routing, auto-backtrack, review pause/resume, cancellation, and the
//! event-stream guarantees.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use common::{build_service, ctx, kinds, service_with_agents, start_and_wait, wait_for_status, wf};
use hensu::adapters::agents::{ScriptedAgent, ScriptedReply};
use hensu::domain::models::HistoryEntry;
use hensu::domain::ports::{Agent, AgentError, AgentReply, ReviewDecision};
use hensu::services::{EventPayload, ExecutionStatus, RunOutcome};

// ============================================================================
// Scenario: simple pass
// ============================================================================

#[tokio::test]
async fn test_simple_pass_stores_output_and_completes() {
    let service = service_with_agents(vec![(
        "a1",
        Arc::new(ScriptedAgent::always("ok")) as Arc<dyn Agent>,
    )])
    .await;

    let workflow = wf(json!({
        "id": "simple", "version": "1",
        "agents": {"a1": {}},
        "nodes": {
            "start": {
                "nodeType": "STANDARD", "agentId": "a1", "prompt": "go",
                "transitions": [{"type": "success", "target": "end"}]
            },
            "end": {"nodeType": "END", "status": "SUCCESS"}
        },
        "startNode": "start"
    }));

    let (_, events, view) = start_and_wait(&service, "t1", workflow, HashMap::new()).await;

    assert_eq!(view.status, ExecutionStatus::Completed);
    assert_eq!(view.snapshot.state.context["start"], json!("ok"));
    assert_eq!(view.snapshot.state.step_count(), 1);
    assert!(view.snapshot.current_node_id.is_none());
    assert!(view.snapshot.lease_is_coherent());

    let EventPayload::ExecutionCompleted { success, final_node_id, .. } =
        &events.last().unwrap().payload
    else {
        panic!("missing completion event");
    };
    assert!(*success);
    assert_eq!(final_node_id.as_deref(), Some("end"));
}

// ============================================================================
// Scenario: retry then succeed / retry exhaustion
// ============================================================================

fn retry_workflow() -> hensu::domain::models::Workflow {
    wf(json!({
        "id": "retrying", "version": "1",
        "agents": {"a1": {}},
        "nodes": {
            "start": {
                "nodeType": "STANDARD", "agentId": "a1", "prompt": "go",
                "transitions": [
                    {"type": "failure", "maxRetries": 3, "target": "fallback"},
                    {"type": "success", "target": "end"}
                ]
            },
            "end": {"nodeType": "END", "status": "SUCCESS"},
            "fallback": {"nodeType": "END", "status": "FAILURE"}
        },
        "startNode": "start"
    }))
}

#[tokio::test]
async fn test_retry_once_then_succeed() {
    let agent = Arc::new(ScriptedAgent::new(vec![
        ScriptedReply::failure("transient"),
        ScriptedReply::text("recovered"),
    ]));
    let service = service_with_agents(vec![("a1", agent as Arc<dyn Agent>)]).await;

    let (_, _, view) = start_and_wait(&service, "t1", retry_workflow(), HashMap::new()).await;

    assert_eq!(view.status, ExecutionStatus::Completed);
    assert_eq!(view.snapshot.state.step_count(), 2);
    let steps: Vec<_> = view
        .snapshot
        .state
        .history
        .iter()
        .filter_map(|e| match e {
            HistoryEntry::Step(s) => Some(s.node_id.as_str()),
            HistoryEntry::Backtrack(_) => None,
        })
        .collect();
    assert_eq!(steps, vec!["start", "start"]);
}

#[tokio::test]
async fn test_retry_exhaustion_routes_to_fallback() {
    let agent = Arc::new(ScriptedAgent::always_failing("permanently broken"));
    let service = service_with_agents(vec![("a1", agent as Arc<dyn Agent>)]).await;

    let (_, _, view) = start_and_wait(&service, "t1", retry_workflow(), HashMap::new()).await;

    // One initial attempt plus three retries, then the failure edge.
    assert_eq!(view.status, ExecutionStatus::Failed);
    assert_eq!(view.snapshot.state.step_count(), 4);
    assert_eq!(view.snapshot.state.retry_counts["start"], 4);
}

// ============================================================================
// Scenario: score routing
// ============================================================================

#[tokio::test]
async fn test_score_transition_routes_by_rubric() {
    let agent = Arc::new(ScriptedAgent::always(r#"{"score": 90}"#));
    let service = service_with_agents(vec![("a1", agent as Arc<dyn Agent>)]).await;

    let workflow = wf(json!({
        "id": "scored", "version": "1",
        "agents": {"a1": {}},
        "rubrics": {"quality": {"id": "quality", "passThreshold": 70.0}},
        "nodes": {
            "work": {
                "nodeType": "STANDARD", "agentId": "a1", "prompt": "go",
                "rubricId": "quality",
                "transitions": [
                    {"type": "score", "conditions": [
                        {"op": "GTE", "value": 80.0, "target": "excellent"},
                        {"op": "LT", "value": 80.0, "target": "poor"}
                    ]}
                ]
            },
            "excellent": {"nodeType": "END", "status": "SUCCESS"},
            "poor": {"nodeType": "END", "status": "FAILURE"}
        },
        "startNode": "work"
    }));

    let (_, events, view) = start_and_wait(&service, "t1", workflow, HashMap::new()).await;

    assert_eq!(view.status, ExecutionStatus::Completed);
    let EventPayload::ExecutionCompleted { final_node_id, .. } = &events.last().unwrap().payload
    else {
        panic!("missing completion event");
    };
    assert_eq!(final_node_id.as_deref(), Some("excellent"));
    // The evaluation is scoped to its node; it never leaks past it.
    assert!(view.snapshot.state.last_rubric.is_none());
}

// ============================================================================
// Scenario: auto-backtrack
// ============================================================================

#[tokio::test]
async fn test_auto_backtrack_reruns_node_until_rubric_passes() {
    let agent = Arc::new(ScriptedAgent::new(vec![
        ScriptedReply::text(r#"{"score": 75}"#),
        ScriptedReply::text(r#"{"score": 90}"#),
    ]));
    let service = service_with_agents(vec![("a1", agent as Arc<dyn Agent>)]).await;

    let workflow = wf(json!({
        "id": "reworked", "version": "1",
        "agents": {"a1": {}},
        "rubrics": {"quality": {"id": "quality", "passThreshold": 80.0}},
        "nodes": {
            "work": {
                "nodeType": "STANDARD", "agentId": "a1", "prompt": "go",
                "rubricId": "quality",
                "transitions": [{"type": "success", "target": "end"}]
            },
            "end": {"nodeType": "END", "status": "SUCCESS"}
        },
        "startNode": "work"
    }));

    let (_, events, view) = start_and_wait(&service, "t1", workflow, HashMap::new()).await;

    assert_eq!(view.status, ExecutionStatus::Completed);
    assert_eq!(view.snapshot.state.step_count(), 2);
    let backtracks: Vec<_> = view
        .snapshot
        .state
        .history
        .iter()
        .filter(|e| matches!(e, HistoryEntry::Backtrack(_)))
        .collect();
    assert_eq!(backtracks.len(), 1);
    assert!(kinds(&events).contains(&"backtrack"));
}

#[tokio::test]
async fn test_auto_backtrack_exhaustion_resumes_normal_routing() {
    // Always below threshold: three auto-backtracks, then the success edge.
    let agent = Arc::new(ScriptedAgent::always(r#"{"score": 60}"#));
    let service = service_with_agents(vec![("a1", agent as Arc<dyn Agent>)]).await;

    let workflow = wf(json!({
        "id": "stubborn", "version": "1",
        "agents": {"a1": {}},
        "rubrics": {"quality": {"id": "quality", "passThreshold": 80.0}},
        "nodes": {
            "work": {
                "nodeType": "STANDARD", "agentId": "a1", "prompt": "go",
                "rubricId": "quality",
                "transitions": [{"type": "success", "target": "end"}]
            },
            "end": {"nodeType": "END", "status": "SUCCESS"}
        },
        "startNode": "work"
    }));

    let (_, _, view) = start_and_wait(&service, "t1", workflow, HashMap::new()).await;

    assert_eq!(view.status, ExecutionStatus::Completed);
    // Initial attempt + one per allowed backtrack.
    assert_eq!(view.snapshot.state.step_count(), 4);
    assert_eq!(view.snapshot.state.backtrack_counts["work"], 3);
}

// ============================================================================
// Review pause / resume
// ============================================================================

fn reviewed_workflow() -> hensu::domain::models::Workflow {
    wf(json!({
        "id": "reviewed", "version": "1",
        "agents": {"a1": {}},
        "nodes": {
            "work": {
                "nodeType": "STANDARD", "agentId": "a1", "prompt": "go",
                "review": {"mode": "required"},
                "transitions": [{"type": "success", "target": "end"}]
            },
            "end": {"nodeType": "END", "status": "SUCCESS"}
        },
        "startNode": "work"
    }))
}

#[tokio::test]
async fn test_required_review_without_reviewer_pauses_then_resumes() {
    let service = service_with_agents(vec![(
        "a1",
        Arc::new(ScriptedAgent::always("done")) as Arc<dyn Agent>,
    )])
    .await;

    let execution_id = service
        .start_execution("t1", reviewed_workflow(), HashMap::new())
        .await
        .unwrap();

    let view = wait_for_status(&service, "t1", execution_id, ExecutionStatus::Paused).await;
    assert_eq!(view.snapshot.current_node_id.as_deref(), Some("work"));
    assert!(view.snapshot.lease_is_coherent());

    let paused = service.list_paused("t1").await.unwrap();
    assert_eq!(paused.len(), 1);
    assert_eq!(paused[0].execution_id, execution_id);

    let outcome = service
        .resume_execution("t1", execution_id, Some(ReviewDecision::Approve))
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Terminal(_)));

    let view = service.get_status("t1", execution_id).await.unwrap();
    assert_eq!(view.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_resume_with_reject_terminates_rejected() {
    let service = service_with_agents(vec![(
        "a1",
        Arc::new(ScriptedAgent::always("done")) as Arc<dyn Agent>,
    )])
    .await;

    let execution_id = service
        .start_execution("t1", reviewed_workflow(), HashMap::new())
        .await
        .unwrap();
    wait_for_status(&service, "t1", execution_id, ExecutionStatus::Paused).await;

    service
        .resume_execution(
            "t1",
            execution_id,
            Some(ReviewDecision::Reject {
                reason: "not good enough".to_string(),
            }),
        )
        .await
        .unwrap();

    let view = service.get_status("t1", execution_id).await.unwrap();
    assert_eq!(view.status, ExecutionStatus::Rejected);
}

#[tokio::test]
async fn test_reviewer_backtrack_replays_from_target() {
    struct BacktrackOnce {
        decided: std::sync::Mutex<bool>,
    }

    #[async_trait]
    impl hensu::domain::ports::Reviewer for BacktrackOnce {
        async fn request(
            &self,
            _node_id: &str,
            _state: &hensu::domain::models::HensuState,
            _result: &hensu::domain::models::NodeResult,
        ) -> Result<ReviewDecision, hensu::domain::ports::ReviewError> {
            let mut decided = self.decided.lock().unwrap();
            if *decided {
                Ok(ReviewDecision::Approve)
            } else {
                *decided = true;
                Ok(ReviewDecision::Backtrack {
                    target: "draft".to_string(),
                    state_override: None,
                    reason: "redo the draft".to_string(),
                })
            }
        }
    }

    let service = build_service(
        vec![("a1", Arc::new(ScriptedAgent::always("text")) as Arc<dyn Agent>)],
        Some(Arc::new(BacktrackOnce {
            decided: std::sync::Mutex::new(false),
        })),
        None,
    )
    .await;

    let workflow = wf(json!({
        "id": "redone", "version": "1",
        "agents": {"a1": {}},
        "nodes": {
            "draft": {
                "nodeType": "STANDARD", "agentId": "a1", "prompt": "draft",
                "transitions": [{"type": "success", "target": "review"}]
            },
            "review": {
                "nodeType": "STANDARD", "agentId": "a1", "prompt": "review",
                "review": {"mode": "required"},
                "transitions": [{"type": "success", "target": "end"}]
            },
            "end": {"nodeType": "END", "status": "SUCCESS"}
        },
        "startNode": "draft"
    }));

    let (_, _, view) = start_and_wait(&service, "t1", workflow, HashMap::new()).await;

    assert_eq!(view.status, ExecutionStatus::Completed);
    // draft, review (backtracked), draft, review again.
    assert_eq!(view.snapshot.state.step_count(), 4);
    assert!(view
        .snapshot
        .state
        .history
        .iter()
        .any(|e| matches!(e, HistoryEntry::Backtrack(b) if b.to == "draft")));
}

// ============================================================================
// Cancellation
// ============================================================================

struct SlowAgent;

#[async_trait]
impl Agent for SlowAgent {
    async fn invoke(
        &self,
        _prompt: &str,
        _context: &HashMap<String, serde_json::Value>,
    ) -> Result<AgentReply, AgentError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(AgentReply::text("too late"))
    }
}

#[tokio::test]
async fn test_cancellation_records_cancelled_snapshot() {
    let service = service_with_agents(vec![("a1", Arc::new(SlowAgent) as Arc<dyn Agent>)]).await;

    let workflow = wf(json!({
        "id": "cancellable", "version": "1",
        "agents": {"a1": {}},
        "nodes": {
            "work": {
                "nodeType": "STANDARD", "agentId": "a1", "prompt": "go",
                "transitions": [{"type": "success", "target": "end"}]
            },
            "end": {"nodeType": "END", "status": "SUCCESS"}
        },
        "startNode": "work"
    }));

    let execution_id = service
        .start_execution("t1", workflow, HashMap::new())
        .await
        .unwrap();
    wait_for_status(&service, "t1", execution_id, ExecutionStatus::Running).await;

    assert!(service.cancel_execution(execution_id).await);

    let view = wait_for_status(&service, "t1", execution_id, ExecutionStatus::Cancelled).await;
    assert!(view.snapshot.current_node_id.is_none());
    assert!(view.snapshot.lease_is_coherent());
}

// ============================================================================
// Event stream guarantees
// ============================================================================

#[tokio::test]
async fn test_event_order_and_output_filtering() {
    let service = service_with_agents(vec![(
        "a1",
        Arc::new(ScriptedAgent::always("visible")) as Arc<dyn Agent>,
    )])
    .await;

    let workflow = wf(json!({
        "id": "observed", "version": "1",
        "agents": {"a1": {}},
        "nodes": {
            "first": {
                "nodeType": "STANDARD", "agentId": "a1", "prompt": "one",
                "transitions": [{"type": "success", "target": "second"}]
            },
            "second": {
                "nodeType": "STANDARD", "agentId": "a1", "prompt": "two",
                "transitions": [{"type": "success", "target": "end"}]
            },
            "end": {"nodeType": "END", "status": "SUCCESS"}
        },
        "startNode": "first"
    }));

    let (_, events, _) = start_and_wait(
        &service,
        "t1",
        workflow,
        ctx(json!({"_internal": "hidden", "visible_key": "shown"})),
    )
    .await;

    let trail = kinds(&events);
    assert_eq!(trail.first(), Some(&"execution.started"));
    assert_eq!(trail.last(), Some(&"execution.completed"));

    // Every node.started precedes its node.completed, in path order.
    let node_events: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::NodeStarted { node_id } => Some(("started", node_id.clone())),
            EventPayload::NodeCompleted { node_id, .. } => Some(("completed", node_id.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        node_events,
        vec![
            ("started", "first".to_string()),
            ("completed", "first".to_string()),
            ("started", "second".to_string()),
            ("completed", "second".to_string()),
        ]
    );

    // Sequence numbers are strictly increasing within the execution.
    for pair in events.windows(2) {
        assert!(pair[0].sequence < pair[1].sequence);
    }

    let EventPayload::ExecutionCompleted { output, .. } = &events.last().unwrap().payload else {
        panic!("missing completion event");
    };
    assert!(output.contains_key("visible_key"));
    assert!(output.contains_key("first"));
    assert!(!output.keys().any(|k| k.starts_with('_')));
}

// ============================================================================
// Fatal routing errors
// ============================================================================

#[tokio::test]
async fn test_missing_transition_fails_the_execution() {
    let service = service_with_agents(vec![(
        "a1",
        Arc::new(ScriptedAgent::always_failing("bad")) as Arc<dyn Agent>,
    )])
    .await;

    // Only a success edge: a failure outcome has nowhere to go.
    let workflow = wf(json!({
        "id": "deadend", "version": "1",
        "agents": {"a1": {}},
        "nodes": {
            "work": {
                "nodeType": "STANDARD", "agentId": "a1", "prompt": "go",
                "transitions": [{"type": "success", "target": "end"}]
            },
            "end": {"nodeType": "END", "status": "SUCCESS"}
        },
        "startNode": "work"
    }));

    let (_, _, view) = start_and_wait(&service, "t1", workflow, HashMap::new()).await;
    assert_eq!(view.status, ExecutionStatus::Failed);
}
