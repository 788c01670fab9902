//! In-memory repository adapters.
//!
//! Used by tests and by scheduler-disabled deployments. The state
//! repository implements the full lease contract: operations run under one
//! mutex, so heartbeat and claim are atomic within the process.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::rubric::Rubric;
use crate::domain::models::snapshot::{CheckpointReason, HensuSnapshot};
use crate::domain::models::workflow::Workflow;
use crate::domain::ports::{
    ClaimedExecution, RubricRepository, StateRepository, WorkflowRepository,
};

// ============================================================================
// Workflow definitions
// ============================================================================

#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    workflows: Mutex<HashMap<(String, String), Workflow>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn save(&self, tenant_id: &str, workflow: &Workflow) -> DomainResult<()> {
        self.workflows
            .lock()
            .expect("workflow map lock")
            .insert((tenant_id.to_string(), workflow.id.clone()), workflow.clone());
        Ok(())
    }

    async fn find(&self, tenant_id: &str, workflow_id: &str) -> DomainResult<Option<Workflow>> {
        Ok(self
            .workflows
            .lock()
            .expect("workflow map lock")
            .get(&(tenant_id.to_string(), workflow_id.to_string()))
            .cloned())
    }

    async fn delete(&self, tenant_id: &str, workflow_id: &str) -> DomainResult<()> {
        self.workflows
            .lock()
            .expect("workflow map lock")
            .remove(&(tenant_id.to_string(), workflow_id.to_string()));
        Ok(())
    }

    async fn list(&self, tenant_id: &str) -> DomainResult<Vec<String>> {
        let mut ids: Vec<String> = self
            .workflows
            .lock()
            .expect("workflow map lock")
            .keys()
            .filter(|(t, _)| t == tenant_id)
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

// ============================================================================
// Execution snapshots
// ============================================================================

#[derive(Default)]
pub struct InMemoryStateRepository {
    snapshots: Mutex<HashMap<(String, Uuid), HensuSnapshot>>,
}

impl InMemoryStateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateRepository for InMemoryStateRepository {
    async fn save(&self, snapshot: &HensuSnapshot) -> DomainResult<()> {
        self.snapshots.lock().expect("snapshot map lock").insert(
            (snapshot.tenant_id.clone(), snapshot.execution_id),
            snapshot.clone(),
        );
        Ok(())
    }

    async fn find_latest(
        &self,
        tenant_id: &str,
        execution_id: Uuid,
    ) -> DomainResult<Option<HensuSnapshot>> {
        Ok(self
            .snapshots
            .lock()
            .expect("snapshot map lock")
            .get(&(tenant_id.to_string(), execution_id))
            .cloned())
    }

    async fn find_by_workflow(
        &self,
        tenant_id: &str,
        workflow_id: &str,
    ) -> DomainResult<Vec<HensuSnapshot>> {
        let mut rows: Vec<HensuSnapshot> = self
            .snapshots
            .lock()
            .expect("snapshot map lock")
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.workflow_id == workflow_id)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.checkpoint_time);
        Ok(rows)
    }

    async fn find_paused(&self, tenant_id: &str) -> DomainResult<Vec<HensuSnapshot>> {
        let mut rows: Vec<HensuSnapshot> = self
            .snapshots
            .lock()
            .expect("snapshot map lock")
            .values()
            .filter(|s| {
                s.tenant_id == tenant_id
                    && s.reason == CheckpointReason::Paused
                    && s.server_node_id.is_none()
            })
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.checkpoint_time);
        Ok(rows)
    }

    async fn update_heartbeats(&self, server_node_id: Uuid) -> DomainResult<u64> {
        let mut map = self.snapshots.lock().expect("snapshot map lock");
        let now = Utc::now();
        let mut touched = 0;
        for snapshot in map.values_mut() {
            if snapshot.reason == CheckpointReason::Checkpoint
                && snapshot.server_node_id == Some(server_node_id)
            {
                snapshot.last_heartbeat_at = Some(now);
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn claim_stale(
        &self,
        server_node_id: Uuid,
        stale_threshold: Duration,
    ) -> DomainResult<Vec<ClaimedExecution>> {
        let mut map = self.snapshots.lock().expect("snapshot map lock");
        let now = Utc::now();
        let cutoff = now - stale_threshold;
        let mut claimed = Vec::new();
        for snapshot in map.values_mut() {
            if snapshot.reason == CheckpointReason::Checkpoint
                && snapshot.last_heartbeat_at.is_some_and(|hb| hb < cutoff)
            {
                snapshot.server_node_id = Some(server_node_id);
                snapshot.last_heartbeat_at = Some(now);
                claimed.push(ClaimedExecution {
                    tenant_id: snapshot.tenant_id.clone(),
                    execution_id: snapshot.execution_id,
                });
            }
        }
        Ok(claimed)
    }
}

// ============================================================================
// Rubrics
// ============================================================================

#[derive(Default)]
pub struct InMemoryRubricRepository {
    rubrics: Mutex<HashMap<String, Rubric>>,
}

impl InMemoryRubricRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, rubric: Rubric) {
        self.rubrics
            .lock()
            .expect("rubric map lock")
            .insert(rubric.id.clone(), rubric);
    }
}

#[async_trait]
impl RubricRepository for InMemoryRubricRepository {
    async fn find(&self, rubric_id: &str) -> DomainResult<Option<Rubric>> {
        Ok(self
            .rubrics
            .lock()
            .expect("rubric map lock")
            .get(rubric_id)
            .cloned())
    }
}
