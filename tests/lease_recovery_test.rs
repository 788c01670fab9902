//! Distributed-recovery plane: snapshot/lease coherence, heartbeat
//! isolation, claim exclusivity, and end-to-end crash recovery across two
//! server nodes sharing one SQLite store.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use serde_json::json;
use uuid::Uuid;

use common::{wait_for_status, wf};
use hensu::adapters::agents::ScriptedAgent;
use hensu::adapters::memory::InMemoryRubricRepository;
use hensu::adapters::sqlite::{
    create_migrated_test_pool, SqliteStateRepository, SqliteWorkflowRepository,
};
use hensu::domain::models::{CheckpointReason, Config, HensuSnapshot, HensuState};
use hensu::domain::ports::{StateRepository, WorkflowRepository};
use hensu::services::{
    ActionDispatcher, ExecutionService, ExecutionStatus, LeaseManager, RecoverySweeper,
};

async fn sqlite_service(
    pool: sqlx::SqlitePool,
    server_node_id: Uuid,
) -> Arc<ExecutionService> {
    let config = Config {
        server_node_id: Some(server_node_id),
        ..Config::default()
    };
    ExecutionService::new(
        config,
        Arc::new(SqliteWorkflowRepository::new(pool.clone())),
        Arc::new(SqliteStateRepository::new(pool)),
        Arc::new(InMemoryRubricRepository::new()),
        None,
        None,
        Arc::new(ActionDispatcher::server()),
        true,
    )
}

fn two_step_workflow() -> hensu::domain::models::Workflow {
    wf(json!({
        "id": "recoverable", "version": "1",
        "agents": {"a1": {}},
        "nodes": {
            "work": {
                "nodeType": "STANDARD", "agentId": "a1", "prompt": "go",
                "transitions": [{"type": "success", "target": "end"}]
            },
            "end": {"nodeType": "END", "status": "SUCCESS"}
        },
        "startNode": "work"
    }))
}

#[tokio::test]
async fn test_crashed_node_execution_is_claimed_and_finished_by_peer() {
    let pool = create_migrated_test_pool().await.unwrap();
    let store = Arc::new(SqliteStateRepository::new(pool.clone()));
    let workflows = SqliteWorkflowRepository::new(pool.clone());

    // Node A checkpointed this execution mid-workflow and then died: its
    // heartbeat is far in the past.
    let node_a = Uuid::new_v4();
    let workflow = two_step_workflow();
    workflows.save("t1", &workflow).await.unwrap();

    let mut snapshot = HensuSnapshot::checkpoint(
        "t1",
        Uuid::new_v4(),
        "recoverable",
        HensuState::new("work", HashMap::new()),
        node_a,
    );
    snapshot.last_heartbeat_at = Some(chrono::Utc::now() - ChronoDuration::seconds(600));
    store.save(&snapshot).await.unwrap();

    // Node B sweeps.
    let node_b = Uuid::new_v4();
    let service_b = sqlite_service(pool, node_b).await;
    service_b
        .agents()
        .register("a1", Arc::new(ScriptedAgent::always("recovered output")))
        .await;

    let sweeper = RecoverySweeper::new(
        service_b.lease().clone(),
        store.clone(),
        ChronoDuration::seconds(90),
    );
    sweeper.sweep(service_b.as_ref()).await;

    // The execution finishes under B's ownership.
    let view = wait_for_status(
        &service_b,
        "t1",
        snapshot.execution_id,
        ExecutionStatus::Completed,
    )
    .await;
    assert_eq!(
        view.snapshot.state.context["work"],
        json!("recovered output")
    );
    assert!(view.snapshot.lease_is_coherent());
    assert_eq!(view.snapshot.reason, CheckpointReason::Completed);
}

#[tokio::test]
async fn test_claim_records_new_owner_before_resumption() {
    let pool = create_migrated_test_pool().await.unwrap();
    let store = Arc::new(SqliteStateRepository::new(pool));

    let node_a = Uuid::new_v4();
    let mut snapshot = HensuSnapshot::checkpoint(
        "t1",
        Uuid::new_v4(),
        "wf",
        HensuState::new("work", HashMap::new()),
        node_a,
    );
    snapshot.last_heartbeat_at = Some(chrono::Utc::now() - ChronoDuration::seconds(600));
    store.save(&snapshot).await.unwrap();

    let lease_b = LeaseManager::new(store.clone(), None);
    let claimed = lease_b
        .claim_stale_executions(ChronoDuration::seconds(90))
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);

    let row = store
        .find_latest("t1", snapshot.execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.server_node_id, Some(lease_b.server_node_id()));
    assert!(row.last_heartbeat_at.unwrap() > chrono::Utc::now() - ChronoDuration::seconds(5));
}

#[tokio::test]
async fn test_concurrent_sweepers_never_double_claim() {
    let pool = create_migrated_test_pool().await.unwrap();
    let store = Arc::new(SqliteStateRepository::new(pool));

    let dead = Uuid::new_v4();
    let mut snapshot = HensuSnapshot::checkpoint(
        "t1",
        Uuid::new_v4(),
        "wf",
        HensuState::new("work", HashMap::new()),
        dead,
    );
    snapshot.last_heartbeat_at = Some(chrono::Utc::now() - ChronoDuration::seconds(600));
    store.save(&snapshot).await.unwrap();

    let lease_b = LeaseManager::new(store.clone(), None);
    let lease_c = LeaseManager::new(store.clone(), None);

    let (claims_b, claims_c) = tokio::join!(
        lease_b.claim_stale_executions(ChronoDuration::seconds(90)),
        lease_c.claim_stale_executions(ChronoDuration::seconds(90)),
    );
    let total = claims_b.unwrap().len() + claims_c.unwrap().len();
    assert_eq!(total, 1, "exactly one sweeper may claim a stale row");
}

#[tokio::test]
async fn test_heartbeats_do_not_touch_other_nodes_rows() {
    let pool = create_migrated_test_pool().await.unwrap();
    let store = Arc::new(SqliteStateRepository::new(pool));

    let node_a = Uuid::new_v4();
    let node_b = Uuid::new_v4();

    let a_row = HensuSnapshot::checkpoint(
        "t1",
        Uuid::new_v4(),
        "wf",
        HensuState::new("n", HashMap::new()),
        node_a,
    );
    let mut b_row = HensuSnapshot::checkpoint(
        "t1",
        Uuid::new_v4(),
        "wf",
        HensuState::new("n", HashMap::new()),
        node_b,
    );
    b_row.last_heartbeat_at = Some(chrono::Utc::now() - ChronoDuration::seconds(30));
    let b_heartbeat = b_row.last_heartbeat_at;
    store.save(&a_row).await.unwrap();
    store.save(&b_row).await.unwrap();

    let lease_a = LeaseManager::new(store.clone(), Some(node_a));
    assert_eq!(lease_a.update_heartbeats().await.unwrap(), 1);

    let b_reloaded = store
        .find_latest("t1", b_row.execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(b_reloaded.server_node_id, Some(node_b));
    // Microsecond-truncated storage; compare at second precision.
    assert_eq!(
        b_reloaded.last_heartbeat_at.unwrap().timestamp(),
        b_heartbeat.unwrap().timestamp()
    );
}

#[tokio::test]
async fn test_every_persisted_snapshot_keeps_lease_coherence() {
    let pool = create_migrated_test_pool().await.unwrap();
    let store = Arc::new(SqliteStateRepository::new(pool.clone()));
    let service = sqlite_service(pool, Uuid::new_v4()).await;
    service
        .agents()
        .register("a1", Arc::new(ScriptedAgent::always("done")))
        .await;

    let execution_id = service
        .start_execution("t1", two_step_workflow(), HashMap::new())
        .await
        .unwrap();
    wait_for_status(&service, "t1", execution_id, ExecutionStatus::Completed).await;

    let rows = store.find_by_workflow("t1", "recoverable").await.unwrap();
    assert!(!rows.is_empty());
    for row in rows {
        assert!(row.lease_is_coherent(), "row {:?} violates lease coherence", row.reason);
    }
}

#[tokio::test]
async fn test_recovered_terminal_row_is_skipped() {
    let pool = create_migrated_test_pool().await.unwrap();
    let store = Arc::new(SqliteStateRepository::new(pool.clone()));
    let service = sqlite_service(pool, Uuid::new_v4()).await;

    // A terminal row, even with a forged stale heartbeat, is never resumed.
    let snapshot = HensuSnapshot::terminal(
        "t1",
        Uuid::new_v4(),
        "wf",
        HensuState::new("n", HashMap::new()),
        CheckpointReason::Completed,
    );
    store.save(&snapshot).await.unwrap();

    let sweeper = RecoverySweeper::new(
        service.lease().clone(),
        store.clone(),
        ChronoDuration::seconds(90),
    );
    sweeper.sweep(service.as_ref()).await;

    let row = store
        .find_latest("t1", snapshot.execution_id)
        .await
        .unwrap()
        .unwrap();
    assert!(row.server_node_id.is_none());
    assert_eq!(row.reason, CheckpointReason::Completed);
}
