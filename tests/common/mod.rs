//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use hensu::adapters::memory::{
    InMemoryRubricRepository, InMemoryStateRepository, InMemoryWorkflowRepository,
};
use hensu::domain::models::{Config, Workflow};
use hensu::domain::ports::{Agent, Planner, Reviewer};
use hensu::services::{
    ActionDispatcher, EventPayload, ExecutionService, ExecutionStatus, ExecutionStatusView,
    ExecutionEvent,
};

/// Parse a workflow literal.
pub fn wf(json: serde_json::Value) -> Workflow {
    serde_json::from_value(json).expect("workflow literal")
}

/// JSON object literal into a context map.
pub fn ctx(json: serde_json::Value) -> HashMap<String, serde_json::Value> {
    serde_json::from_value(json).expect("context literal")
}

/// In-memory service with the given agents registered.
pub async fn service_with_agents(
    agents: Vec<(&str, Arc<dyn Agent>)>,
) -> Arc<ExecutionService> {
    build_service(agents, None, None).await
}

pub async fn build_service(
    agents: Vec<(&str, Arc<dyn Agent>)>,
    reviewer: Option<Arc<dyn Reviewer>>,
    planner: Option<Arc<dyn Planner>>,
) -> Arc<ExecutionService> {
    let service = ExecutionService::new(
        Config::default(),
        Arc::new(InMemoryWorkflowRepository::new()),
        Arc::new(InMemoryStateRepository::new()),
        Arc::new(InMemoryRubricRepository::new()),
        reviewer,
        planner,
        Arc::new(ActionDispatcher::server()),
        false,
    );
    for (id, agent) in agents {
        service.agents().register(id, agent).await;
    }
    service
}

/// Start an execution, collect its events until `execution.completed`, and
/// return the id, the event trail, and the final status view.
pub async fn start_and_wait(
    service: &Arc<ExecutionService>,
    tenant: &str,
    workflow: Workflow,
    initial_context: HashMap<String, serde_json::Value>,
) -> (Uuid, Vec<ExecutionEvent>, ExecutionStatusView) {
    let execution_id = Uuid::new_v4();
    let mut rx = service.subscribe_events(execution_id);
    service
        .start_execution_with_id(tenant, workflow, initial_context, execution_id)
        .await
        .expect("start execution");

    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let event = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .expect("execution did not complete in time")
            .expect("event stream closed early");
        let terminal = matches!(event.payload, EventPayload::ExecutionCompleted { .. });
        events.push(event);
        if terminal {
            break;
        }
    }

    let view = service
        .get_status(tenant, execution_id)
        .await
        .expect("status");
    (execution_id, events, view)
}

/// Poll until the execution reaches the wanted status.
pub async fn wait_for_status(
    service: &Arc<ExecutionService>,
    tenant: &str,
    execution_id: Uuid,
    wanted: ExecutionStatus,
) -> ExecutionStatusView {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(view) = service.get_status(tenant, execution_id).await {
            if view.status == wanted {
                return view;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "execution {} never reached {:?}",
            execution_id,
            wanted
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Event kinds in publish order.
pub fn kinds(events: &[ExecutionEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.payload.kind()).collect()
}
