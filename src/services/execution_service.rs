//! Service facade over the execution engine.
//!
//! Owns the registries, the executor, the lease manager, and the scheduler
//! daemons, and exposes the operations an embedding server calls: register
//! and start workflows, resume paused executions with a decision, inspect
//! status and pending plans, subscribe to event streams, cancel.

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::adapters::agents::AgentRegistry;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::config::Config;
use crate::domain::models::plan::Plan;
use crate::domain::models::snapshot::{CheckpointReason, HensuSnapshot};
use crate::domain::models::state::HensuState;
use crate::domain::models::workflow::Workflow;
use crate::domain::ports::{
    GenericHandler, Planner, ReviewDecision, Reviewer, RubricRepository, StateRepository,
    WorkflowRepository,
};
use crate::services::action_dispatcher::ActionDispatcher;
use crate::services::consensus::ConsensusEvaluator;
use crate::services::event_broadcaster::{run_as, EventBroadcaster, EventPayload, ExecutionEvent};
use crate::services::executor::{RunOutcome, WorkflowExecutor, PENDING_REVIEW_KEY};
use crate::services::lease_manager::LeaseManager;
use crate::services::node_executor::NodeExecutor;
use crate::services::plan_engine::{PlanEngine, PENDING_PLAN_KEY};
use crate::services::recovery::{RecoverySweeper, RecoveryTarget};
use crate::services::review_gate::ReviewGate;
use crate::services::rubric_engine::RubricEngine;

/// Coarse execution status derived from the latest snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Rejected,
    Cancelled,
}

impl From<CheckpointReason> for ExecutionStatus {
    fn from(reason: CheckpointReason) -> Self {
        match reason {
            CheckpointReason::Checkpoint => Self::Running,
            CheckpointReason::Paused => Self::Paused,
            CheckpointReason::Completed => Self::Completed,
            CheckpointReason::Failed => Self::Failed,
            CheckpointReason::Rejected => Self::Rejected,
            CheckpointReason::Cancelled => Self::Cancelled,
        }
    }
}

/// Latest snapshot plus its derived status.
#[derive(Debug, Clone)]
pub struct ExecutionStatusView {
    pub snapshot: HensuSnapshot,
    pub status: ExecutionStatus,
}

struct SchedulerHandles {
    cancel: CancellationToken,
    heartbeat: tokio::task::JoinHandle<()>,
    sweeper: tokio::task::JoinHandle<()>,
}

pub struct ExecutionService {
    config: Config,
    workflows: Arc<dyn WorkflowRepository>,
    snapshots: Arc<dyn StateRepository>,
    agents: Arc<AgentRegistry>,
    actions: Arc<ActionDispatcher>,
    node_executor: Arc<NodeExecutor>,
    executor: Arc<WorkflowExecutor>,
    broadcaster: Arc<EventBroadcaster>,
    lease: Arc<LeaseManager>,
    running: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    scheduler: Mutex<Option<SchedulerHandles>>,
}

impl ExecutionService {
    /// Wire the full engine. `persistent` controls whether the lease plane
    /// is live; pass false for in-memory deployments.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        workflows: Arc<dyn WorkflowRepository>,
        snapshots: Arc<dyn StateRepository>,
        rubrics: Arc<dyn RubricRepository>,
        reviewer: Option<Arc<dyn Reviewer>>,
        planner: Option<Arc<dyn Planner>>,
        actions: Arc<ActionDispatcher>,
        persistent: bool,
    ) -> Arc<Self> {
        let agents = Arc::new(AgentRegistry::new());
        let broadcaster = Arc::new(EventBroadcaster::default());

        let rubric_engine = Arc::new(RubricEngine::new(
            rubrics,
            agents.clone(),
            config.engine.reject_keywords.clone(),
        ));
        let plan_engine = Arc::new(PlanEngine::new(
            planner,
            actions.clone(),
            agents.clone(),
            broadcaster.clone(),
        ));
        let consensus = Arc::new(ConsensusEvaluator::new(
            rubric_engine.clone(),
            agents.clone(),
            config.engine.approve_keywords.clone(),
            config.engine.reject_keywords.clone(),
        ));
        let node_executor = Arc::new(NodeExecutor::new(
            agents.clone(),
            rubric_engine,
            actions.clone(),
            plan_engine,
            consensus,
            Duration::from_millis(config.engine.default_join_timeout_ms),
        ));

        let lease = Arc::new(if persistent {
            LeaseManager::new(snapshots.clone(), config.server_node_id)
        } else {
            LeaseManager::inactive(snapshots.clone())
        });

        let review_gate = Arc::new(ReviewGate::new(reviewer));
        let executor = Arc::new(WorkflowExecutor::new(
            node_executor.clone(),
            review_gate,
            snapshots.clone(),
            broadcaster.clone(),
            lease.server_node_id(),
            config.engine.max_backtracks,
        ));

        Arc::new(Self {
            config,
            workflows,
            snapshots,
            agents,
            actions,
            node_executor,
            executor,
            broadcaster,
            lease,
            running: Arc::new(RwLock::new(HashMap::new())),
            scheduler: Mutex::new(None),
        })
    }

    // ========================================================================
    // Registries
    // ========================================================================

    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    pub fn actions(&self) -> &Arc<ActionDispatcher> {
        &self.actions
    }

    pub fn lease(&self) -> &Arc<LeaseManager> {
        &self.lease
    }

    pub async fn register_generic_handler(
        &self,
        executor_type: impl Into<String>,
        handler: Arc<dyn GenericHandler>,
    ) {
        self.node_executor
            .register_generic_handler(executor_type, handler)
            .await;
    }

    /// Validate and persist a workflow definition.
    pub async fn register_workflow(&self, tenant_id: &str, workflow: &Workflow) -> DomainResult<()> {
        workflow.validate()?;
        self.workflows.save(tenant_id, workflow).await
    }

    // ========================================================================
    // Exposed execution API
    // ========================================================================

    /// Start an execution of a compiled workflow. Non-blocking: the
    /// execution advances on a background task. The initial snapshot is
    /// persisted before this returns; a persistence failure aborts the
    /// start and surfaces to the caller.
    pub async fn start_execution(
        self: &Arc<Self>,
        tenant_id: &str,
        workflow: Workflow,
        initial_context: HashMap<String, serde_json::Value>,
    ) -> DomainResult<Uuid> {
        self.start_execution_with_id(tenant_id, workflow, initial_context, Uuid::new_v4())
            .await
    }

    /// Start with a caller-chosen execution id, so callers can subscribe
    /// to the event stream before the first event fires.
    pub async fn start_execution_with_id(
        self: &Arc<Self>,
        tenant_id: &str,
        workflow: Workflow,
        initial_context: HashMap<String, serde_json::Value>,
        execution_id: Uuid,
    ) -> DomainResult<Uuid> {
        workflow.validate()?;
        self.workflows.save(tenant_id, &workflow).await?;
        self.start_registered(tenant_id, Arc::new(workflow), initial_context, execution_id)
            .await
    }

    /// Start an execution of an already registered workflow.
    pub async fn start_execution_by_id(
        self: &Arc<Self>,
        tenant_id: &str,
        workflow_id: &str,
        initial_context: HashMap<String, serde_json::Value>,
    ) -> DomainResult<Uuid> {
        let workflow = self
            .workflows
            .find(tenant_id, workflow_id)
            .await?
            .ok_or_else(|| DomainError::WorkflowNotFound(workflow_id.to_string()))?;
        self.start_registered(tenant_id, Arc::new(workflow), initial_context, Uuid::new_v4())
            .await
    }

    async fn start_registered(
        self: &Arc<Self>,
        tenant_id: &str,
        workflow: Arc<Workflow>,
        initial_context: HashMap<String, serde_json::Value>,
        execution_id: Uuid,
    ) -> DomainResult<Uuid> {
        let state = HensuState::new(&workflow.start_node, initial_context);

        // Claim the row before the background task exists, so a dead
        // process between these lines is recoverable by a peer.
        let snapshot = HensuSnapshot::checkpoint(
            tenant_id,
            execution_id,
            &workflow.id,
            state.clone(),
            self.executor.server_node_id(),
        );
        self.snapshots.save(&snapshot).await?;

        tracing::info!(
            execution_id = %execution_id,
            workflow = %workflow.id,
            tenant = %tenant_id,
            "Execution started"
        );
        self.spawn_run(tenant_id.to_string(), workflow, execution_id, state, None, true)
            .await;
        Ok(execution_id)
    }

    /// Resume a paused (or recovered) execution, optionally answering the
    /// pending review. Runs inline and returns the outcome.
    pub async fn resume_execution(
        self: &Arc<Self>,
        tenant_id: &str,
        execution_id: Uuid,
        decision: Option<ReviewDecision>,
    ) -> DomainResult<RunOutcome> {
        let snapshot = self
            .snapshots
            .find_latest(tenant_id, execution_id)
            .await?
            .ok_or(DomainError::ExecutionNotFound(execution_id))?;
        if snapshot.reason.is_terminal() {
            return Err(DomainError::ValidationFailed(format!(
                "Execution {} is already {}",
                execution_id, snapshot.reason
            )));
        }
        let workflow = self
            .workflows
            .find(tenant_id, &snapshot.workflow_id)
            .await?
            .ok_or_else(|| DomainError::WorkflowNotFound(snapshot.workflow_id.clone()))?;

        let cancel = CancellationToken::new();
        self.running.write().await.insert(execution_id, cancel.clone());

        let executor = self.executor.clone();
        let outcome = run_as(execution_id, async {
            executor
                .run(
                    tenant_id,
                    Arc::new(workflow),
                    execution_id,
                    snapshot.state,
                    decision,
                    cancel,
                )
                .await
        })
        .await;

        self.running.write().await.remove(&execution_id);
        outcome
    }

    /// Latest snapshot plus derived status.
    pub async fn get_status(
        &self,
        tenant_id: &str,
        execution_id: Uuid,
    ) -> DomainResult<ExecutionStatusView> {
        let snapshot = self
            .snapshots
            .find_latest(tenant_id, execution_id)
            .await?
            .ok_or(DomainError::ExecutionNotFound(execution_id))?;
        Ok(ExecutionStatusView {
            status: snapshot.reason.into(),
            snapshot,
        })
    }

    /// Pending plan for an execution paused on plan review.
    pub async fn get_plan(
        &self,
        tenant_id: &str,
        execution_id: Uuid,
    ) -> DomainResult<Option<Plan>> {
        let snapshot = self
            .snapshots
            .find_latest(tenant_id, execution_id)
            .await?
            .ok_or(DomainError::ExecutionNotFound(execution_id))?;
        let Some(value) = snapshot.state.context.get(PENDING_PLAN_KEY) else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(value.clone())?))
    }

    /// Executions parked awaiting a review decision.
    pub async fn list_paused(&self, tenant_id: &str) -> DomainResult<Vec<HensuSnapshot>> {
        self.snapshots.find_paused(tenant_id).await
    }

    /// Ordered event stream for one execution. Subscribe before starting
    /// the execution to observe it from `execution.started` on.
    pub fn subscribe_events(&self, execution_id: Uuid) -> broadcast::Receiver<ExecutionEvent> {
        self.broadcaster.subscribe(execution_id)
    }

    /// Signal cancellation. The current node is finalised, then a
    /// `cancelled` terminal snapshot is recorded.
    pub async fn cancel_execution(&self, execution_id: Uuid) -> bool {
        match self.running.read().await.get(&execution_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Node id of the review a paused execution is waiting on, if any.
    pub fn pending_review_node(snapshot: &HensuSnapshot) -> Option<String> {
        snapshot
            .state
            .context
            .get(PENDING_REVIEW_KEY)
            .and_then(|v| v.get("nodeId"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                snapshot
                    .state
                    .context
                    .get(PENDING_PLAN_KEY)
                    .and_then(|v| v.get("nodeId"))
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
            })
    }

    // ========================================================================
    // Scheduler
    // ========================================================================

    /// Start the heartbeat and recovery daemons. No-op when the scheduler
    /// is disabled or the lease plane is inactive.
    pub async fn start_scheduler(self: &Arc<Self>) {
        if !self.config.scheduler.enabled || !self.lease.is_active() {
            tracing::debug!("Scheduler disabled");
            return;
        }
        let mut guard = self.scheduler.lock().await;
        if guard.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let heartbeat = self.lease.spawn_heartbeat_loop(
            Duration::from_secs(self.config.scheduler.heartbeat_interval_secs),
            cancel.clone(),
        );
        let sweeper = Arc::new(RecoverySweeper::new(
            self.lease.clone(),
            self.snapshots.clone(),
            ChronoDuration::seconds(self.config.scheduler.stale_threshold_secs as i64),
        ));
        let sweeper_handle = sweeper.spawn_loop(
            self.clone() as Arc<dyn RecoveryTarget>,
            Duration::from_secs(self.config.scheduler.recovery_interval_secs),
            cancel.clone(),
        );

        tracing::info!(
            server_node_id = %self.lease.server_node_id(),
            heartbeat_secs = self.config.scheduler.heartbeat_interval_secs,
            recovery_secs = self.config.scheduler.recovery_interval_secs,
            "Scheduler started"
        );
        *guard = Some(SchedulerHandles {
            cancel,
            heartbeat,
            sweeper: sweeper_handle,
        });
    }

    /// Stop the daemons and cancel every live execution.
    pub async fn shutdown(&self) {
        if let Some(handles) = self.scheduler.lock().await.take() {
            handles.cancel.cancel();
            let _ = handles.heartbeat.await;
            let _ = handles.sweeper.await;
        }
        for token in self.running.read().await.values() {
            token.cancel();
        }
    }

    // ========================================================================
    // Internal
    // ========================================================================

    async fn spawn_run(
        self: &Arc<Self>,
        tenant_id: String,
        workflow: Arc<Workflow>,
        execution_id: Uuid,
        state: HensuState,
        decision: Option<ReviewDecision>,
        announce: bool,
    ) {
        let cancel = CancellationToken::new();
        self.running.write().await.insert(execution_id, cancel.clone());

        let executor = self.executor.clone();
        let broadcaster = self.broadcaster.clone();
        let running = self.running.clone();
        let workflow_id = workflow.id.clone();

        tokio::spawn(run_as(execution_id, async move {
            if announce {
                broadcaster.publish(EventPayload::ExecutionStarted {
                    workflow_id,
                    tenant_id: tenant_id.clone(),
                });
            }
            let outcome = executor
                .run(&tenant_id, workflow, execution_id, state, decision, cancel)
                .await;
            match outcome {
                Ok(RunOutcome::Terminal(result)) => {
                    tracing::info!(
                        execution_id = %execution_id,
                        success = result.is_success(),
                        "Execution finished"
                    );
                }
                Ok(RunOutcome::Paused { .. }) => {
                    tracing::info!(execution_id = %execution_id, "Execution paused");
                }
                Err(e) => {
                    tracing::error!(execution_id = %execution_id, error = %e, "Execution aborted");
                }
            }
            running.write().await.remove(&execution_id);
        }));
    }
}

#[async_trait::async_trait]
impl RecoveryTarget for ExecutionService {
    async fn resume_recovered(&self, snapshot: HensuSnapshot) {
        let workflow = match self
            .workflows
            .find(&snapshot.tenant_id, &snapshot.workflow_id)
            .await
        {
            Ok(Some(workflow)) => Arc::new(workflow),
            Ok(None) => {
                tracing::warn!(
                    execution_id = %snapshot.execution_id,
                    workflow = %snapshot.workflow_id,
                    "Recovered execution references an unknown workflow"
                );
                return;
            }
            Err(e) => {
                tracing::warn!(
                    execution_id = %snapshot.execution_id,
                    error = %e,
                    "Failed to load workflow for recovered execution"
                );
                return;
            }
        };

        let cancel = CancellationToken::new();
        self.running
            .write()
            .await
            .insert(snapshot.execution_id, cancel.clone());

        let executor = self.executor.clone();
        let running = self.running.clone();
        let tenant_id = snapshot.tenant_id.clone();
        let execution_id = snapshot.execution_id;
        let state = snapshot.state;

        tokio::spawn(run_as(execution_id, async move {
            let outcome = executor
                .run(&tenant_id, workflow, execution_id, state, None, cancel)
                .await;
            if let Err(e) = outcome {
                tracing::error!(execution_id = %execution_id, error = %e, "Recovered execution aborted");
            }
            running.write().await.remove(&execution_id);
        }));
    }
}
