//! The workflow executor.
//!
//! Walks the graph one node at a time, delegating node execution to the
//! dispatcher, recording every step in append-only history, persisting a
//! snapshot after every node, and publishing events along the way. Handles
//! transition selection, failure retries, reviewer-driven and rubric-driven
//! backtracks, pause/resume for human review, and cancellation.
//!
//! Fork branches are sub-traversals of the same executor in branch mode:
//! they share the event scope of the parent execution but never persist
//! snapshots and never pause.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::rubric::RubricEvaluation;
use crate::domain::models::snapshot::{CheckpointReason, HensuSnapshot};
use crate::domain::models::state::{HensuState, NodeOutcome, NodeResult};
use crate::domain::models::workflow::{EndStatus, Node, Transition, Workflow};
use crate::domain::ports::{ReviewDecision, StateRepository};
use crate::services::event_broadcaster::{run_as, EventBroadcaster, EventPayload};
use crate::services::fork_join::{BranchOutcome, ForkTable};
use crate::services::node_executor::{BranchSpawner, NodeExecution, NodeExecutor};
use crate::services::plan_engine::{PENDING_PLAN_KEY, PLAN_APPROVED_KEY};
use crate::services::review_gate::{GateOutcome, ReviewGate};

/// Context key carrying the review parked at a paused node.
pub const PENDING_REVIEW_KEY: &str = "_pending_review";

/// Final result of an execution.
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    Completed { status: EndStatus, state: HensuState },
    Rejected { reason: String, state: HensuState },
    Failed { reason: String, state: HensuState },
    Cancelled { state: HensuState },
}

impl ExecutionResult {
    pub fn state(&self) -> &HensuState {
        match self {
            Self::Completed { state, .. }
            | Self::Rejected { state, .. }
            | Self::Failed { state, .. }
            | Self::Cancelled { state } => state,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Completed {
                status: EndStatus::Success,
                ..
            }
        )
    }
}

/// Outcome of one executor run: terminal, or parked for a human decision.
#[derive(Debug)]
pub enum RunOutcome {
    Terminal(ExecutionResult),
    Paused { state: HensuState },
}

/// Review snapshot stored in the context while an execution is parked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingReview {
    node_id: String,
    outcome: NodeOutcome,
    output: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rubric: Option<RubricEvaluation>,
}

enum RunMode {
    Root { tenant_id: String },
    Branch,
}

impl RunMode {
    fn is_root(&self) -> bool {
        matches!(self, Self::Root { .. })
    }
}

pub struct WorkflowExecutor {
    nodes: Arc<NodeExecutor>,
    review_gate: Arc<ReviewGate>,
    snapshots: Arc<dyn StateRepository>,
    broadcaster: Arc<EventBroadcaster>,
    server_node_id: Uuid,
    max_backtracks: u32,
}

impl WorkflowExecutor {
    pub fn new(
        nodes: Arc<NodeExecutor>,
        review_gate: Arc<ReviewGate>,
        snapshots: Arc<dyn StateRepository>,
        broadcaster: Arc<EventBroadcaster>,
        server_node_id: Uuid,
        max_backtracks: u32,
    ) -> Self {
        Self {
            nodes,
            review_gate,
            snapshots,
            broadcaster,
            server_node_id,
            max_backtracks,
        }
    }

    pub fn server_node_id(&self) -> Uuid {
        self.server_node_id
    }

    /// Drive an execution until it terminates or pauses. The caller must
    /// bind the event scope with `run_as(execution_id, ...)`.
    pub async fn run(
        self: &Arc<Self>,
        tenant_id: &str,
        workflow: Arc<Workflow>,
        execution_id: Uuid,
        state: HensuState,
        review_override: Option<ReviewDecision>,
        cancel: CancellationToken,
    ) -> DomainResult<RunOutcome> {
        self.advance(
            RunMode::Root {
                tenant_id: tenant_id.to_string(),
            },
            workflow,
            execution_id,
            state,
            review_override,
            cancel,
        )
        .await
    }

    #[allow(clippy::too_many_lines)]
    async fn advance(
        self: &Arc<Self>,
        mode: RunMode,
        workflow: Arc<Workflow>,
        execution_id: Uuid,
        mut state: HensuState,
        mut review_override: Option<ReviewDecision>,
        cancel: CancellationToken,
    ) -> DomainResult<RunOutcome> {
        let mut forks = ForkTable::new();
        let spawner = ExecutorBranchSpawner {
            executor: self.clone(),
            execution_id,
        };

        loop {
            if cancel.is_cancelled() {
                return self
                    .finish_cancelled(&mode, &workflow, execution_id, state)
                    .await;
            }

            let Some(node_id) = state.current_node_id.clone() else {
                return self
                    .finish_failed(
                        &mode,
                        &workflow,
                        execution_id,
                        state,
                        "execution has no current node".to_string(),
                    )
                    .await;
            };

            let node = match workflow.node(&node_id) {
                Ok(node) => node.clone(),
                Err(e) => {
                    let reason = e.to_string();
                    return self
                        .finish_failed(&mode, &workflow, execution_id, state, reason)
                        .await;
                }
            };

            // Terminal node: record and stop.
            if let Node::End { status } = &node {
                let status = *status;
                return self
                    .finish_end(&mode, &workflow, execution_id, state, node_id, status)
                    .await;
            }

            // A parked plan review for this node is decided before anything
            // else; approval re-dispatches the node with the plan attached.
            if has_pending_plan(&state, &node_id) {
                match self
                    .decide_plan_review(&node_id, &mut state, review_override.take())
                    .await
                {
                    PlanReviewOutcome::Approved => {
                        state
                            .context
                            .insert(PLAN_APPROVED_KEY.to_string(), serde_json::json!(true));
                    }
                    PlanReviewOutcome::Pending => {
                        return self.park(&mode, &workflow, execution_id, state).await;
                    }
                    PlanReviewOutcome::Rejected { reason } => {
                        return self
                            .finish_rejected(&mode, &workflow, execution_id, state, reason)
                            .await;
                    }
                    PlanReviewOutcome::Backtrack { target, reason } => {
                        if let Err(e) = workflow.node(&target) {
                            let reason = e.to_string();
                            return self
                                .finish_failed(&mode, &workflow, execution_id, state, reason)
                                .await;
                        }
                        state.context.remove(PENDING_PLAN_KEY);
                        self.do_backtrack(&mut state, &node_id, &target, &reason);
                        self.checkpoint(&mode, &workflow, execution_id, &state)
                            .await?;
                        continue;
                    }
                }
            }

            // A parked post-execution review resumes without re-running the
            // node; otherwise dispatch it.
            let result = if let Some(pending) = take_pending_review(&mut state, &node_id) {
                NodeResult {
                    outcome: pending.outcome,
                    output: pending.output,
                    metadata: HashMap::new(),
                    rubric: pending.rubric,
                }
            } else {
                self.broadcaster.publish(EventPayload::NodeStarted {
                    node_id: node_id.clone(),
                });

                let execution = self
                    .nodes
                    .execute(
                        &workflow,
                        &node_id,
                        &node,
                        &mut state,
                        &mut forks,
                        &spawner,
                        &cancel,
                    )
                    .await;

                let result = match execution {
                    Ok(NodeExecution::Result(result)) => result,
                    Ok(NodeExecution::AwaitingPlanReview { plan }) => {
                        state.context.insert(
                            PENDING_PLAN_KEY.to_string(),
                            serde_json::to_value(&plan)?,
                        );
                        self.broadcaster.publish(EventPayload::ReviewRequested {
                            node_id: node_id.clone(),
                        });
                        // Decide immediately when possible; park otherwise.
                        continue;
                    }
                    Err(DomainError::Cancelled) => {
                        return self
                            .finish_cancelled(&mode, &workflow, execution_id, state)
                            .await;
                    }
                    Err(e @ DomainError::DatabaseError(_)) => return Err(e),
                    Err(e) => {
                        let reason = e.to_string();
                        return self
                            .finish_failed(&mode, &workflow, execution_id, state, reason)
                            .await;
                    }
                };

                state.record_step(&node_id, &result);
                state.last_rubric = result.rubric.clone();
                self.broadcaster.publish(EventPayload::NodeCompleted {
                    node_id: node_id.clone(),
                    outcome: result.outcome,
                });
                result
            };

            // Human review gate.
            if ReviewGate::review_needed(review_config(&node), &result) {
                self.broadcaster.publish(EventPayload::ReviewRequested {
                    node_id: node_id.clone(),
                });
                let outcome = self
                    .review_gate
                    .decide(&node_id, &state, &result, review_override.take())
                    .await;
                match outcome {
                    GateOutcome::Approved => {
                        self.broadcaster.publish(EventPayload::ReviewDecided {
                            node_id: node_id.clone(),
                            decision: "approve".to_string(),
                        });
                    }
                    GateOutcome::Rejected { reason } => {
                        self.broadcaster.publish(EventPayload::ReviewDecided {
                            node_id: node_id.clone(),
                            decision: "reject".to_string(),
                        });
                        return self
                            .finish_rejected(&mode, &workflow, execution_id, state, reason)
                            .await;
                    }
                    GateOutcome::Backtrack {
                        target,
                        state_override,
                        reason,
                    } => {
                        self.broadcaster.publish(EventPayload::ReviewDecided {
                            node_id: node_id.clone(),
                            decision: "backtrack".to_string(),
                        });
                        if let Err(e) = workflow.node(&target) {
                            let reason = e.to_string();
                            return self
                                .finish_failed(&mode, &workflow, execution_id, state, reason)
                                .await;
                        }
                        if let Some(overrides) = state_override {
                            state.context.extend(overrides);
                        }
                        self.do_backtrack(&mut state, &node_id, &target, &reason);
                        self.checkpoint(&mode, &workflow, execution_id, &state)
                            .await?;
                        continue;
                    }
                    GateOutcome::Pending => {
                        if mode.is_root() {
                            let pending = PendingReview {
                                node_id: node_id.clone(),
                                outcome: result.outcome,
                                output: result.output.clone(),
                                rubric: result.rubric.clone(),
                            };
                            state.context.insert(
                                PENDING_REVIEW_KEY.to_string(),
                                serde_json::to_value(&pending)?,
                            );
                            return self.park(&mode, &workflow, execution_id, state).await;
                        }
                        // Branches cannot pause; an unanswerable review
                        // fails the branch.
                        return self
                            .finish_rejected(
                                &mode,
                                &workflow,
                                execution_id,
                                state,
                                "review required inside a fork branch".to_string(),
                            )
                            .await;
                    }
                }
            }

            // Route to the next node.
            let selection = select_transition(node.transitions(), result.outcome, state.last_rubric.as_ref());

            // Rubric-gated auto-backtrack: a failed evaluation with no score
            // route re-executes the node while the counter lasts. A matched
            // score transition always wins.
            if let Some(rubric) = state.last_rubric.clone() {
                if !rubric.passed && !matches!(selection, Selection::Score(_)) {
                    let attempts = state.backtrack_count(&node_id);
                    if attempts < self.max_backtracks {
                        state.increment_backtrack(&node_id);
                        let reason = format!(
                            "rubric '{}' scored {:.1}, below threshold",
                            rubric.rubric_id, rubric.score
                        );
                        state.record_backtrack_event(&node_id, &node_id, &reason);
                        self.broadcaster.publish(EventPayload::Backtrack {
                            from: node_id.clone(),
                            to: node_id.clone(),
                            reason,
                        });
                        self.checkpoint(&mode, &workflow, execution_id, &state)
                            .await?;
                        continue;
                    }
                }
            }

            let next_node_id = match selection {
                Selection::Score(target) | Selection::Target(target) => target,
                Selection::Retry {
                    max_retries,
                    target,
                } => {
                    let retries = state.increment_retry(&node_id);
                    if retries <= max_retries {
                        tracing::debug!(
                            execution_id = %execution_id,
                            node = %node_id,
                            attempt = retries,
                            max = max_retries,
                            "Retrying failed node"
                        );
                        node_id.clone()
                    } else {
                        target
                    }
                }
                Selection::None => {
                    let reason = DomainError::NoValidTransition {
                        node: node_id.clone(),
                        outcome: result.outcome.to_string(),
                    }
                    .to_string();
                    return self
                        .finish_failed(&mode, &workflow, execution_id, state, reason)
                        .await;
                }
            };

            state.current_node_id = Some(next_node_id);
            state.last_rubric = None;
            self.checkpoint(&mode, &workflow, execution_id, &state)
                .await?;
        }
    }

    // ========================================================================
    // Plan review
    // ========================================================================

    async fn decide_plan_review(
        &self,
        node_id: &str,
        state: &mut HensuState,
        override_decision: Option<ReviewDecision>,
    ) -> PlanReviewOutcome {
        let pseudo_result = NodeResult::success(
            state
                .context
                .get(PENDING_PLAN_KEY)
                .cloned()
                .unwrap_or(serde_json::Value::Null),
        );
        match self
            .review_gate
            .decide(node_id, state, &pseudo_result, override_decision)
            .await
        {
            GateOutcome::Approved => {
                self.broadcaster.publish(EventPayload::ReviewDecided {
                    node_id: node_id.to_string(),
                    decision: "approve".to_string(),
                });
                PlanReviewOutcome::Approved
            }
            GateOutcome::Rejected { reason } => {
                self.broadcaster.publish(EventPayload::ReviewDecided {
                    node_id: node_id.to_string(),
                    decision: "reject".to_string(),
                });
                PlanReviewOutcome::Rejected { reason }
            }
            GateOutcome::Backtrack { target, state_override, reason } => {
                if let Some(overrides) = state_override {
                    state.context.extend(overrides);
                }
                PlanReviewOutcome::Backtrack { target, reason }
            }
            GateOutcome::Pending => PlanReviewOutcome::Pending,
        }
    }

    // ========================================================================
    // Backtrack
    // ========================================================================

    fn do_backtrack(&self, state: &mut HensuState, from: &str, to: &str, reason: &str) {
        state.record_backtrack(from, to, reason);
        self.broadcaster.publish(EventPayload::Backtrack {
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.to_string(),
        });
    }

    // ========================================================================
    // Persistence & terminal paths
    // ========================================================================

    async fn checkpoint(
        &self,
        mode: &RunMode,
        workflow: &Workflow,
        execution_id: Uuid,
        state: &HensuState,
    ) -> DomainResult<()> {
        let RunMode::Root { tenant_id } = mode else {
            return Ok(());
        };
        let snapshot = HensuSnapshot::checkpoint(
            tenant_id,
            execution_id,
            &workflow.id,
            state.clone(),
            self.server_node_id,
        );
        self.snapshots.save(&snapshot).await
    }

    async fn park(
        &self,
        mode: &RunMode,
        workflow: &Workflow,
        execution_id: Uuid,
        state: HensuState,
    ) -> DomainResult<RunOutcome> {
        let RunMode::Root { tenant_id } = mode else {
            // Unreachable: branches never park. Kept as a hard failure so a
            // regression is loud.
            return Ok(RunOutcome::Terminal(ExecutionResult::Failed {
                reason: "branch attempted to pause".to_string(),
                state,
            }));
        };
        let snapshot =
            HensuSnapshot::paused(tenant_id, execution_id, &workflow.id, state.clone());
        self.snapshots.save(&snapshot).await?;
        tracing::info!(
            execution_id = %execution_id,
            node = ?state.current_node_id,
            "Execution paused awaiting review"
        );
        Ok(RunOutcome::Paused { state })
    }

    async fn finish_end(
        &self,
        mode: &RunMode,
        workflow: &Workflow,
        execution_id: Uuid,
        state: HensuState,
        end_node_id: String,
        status: EndStatus,
    ) -> DomainResult<RunOutcome> {
        let reason = match status {
            EndStatus::Success => CheckpointReason::Completed,
            EndStatus::Failure => CheckpointReason::Failed,
            EndStatus::Cancelled => CheckpointReason::Cancelled,
        };
        self.save_terminal(mode, workflow, execution_id, &state, reason)
            .await?;
        if mode.is_root() {
            self.broadcaster.publish_to(
                execution_id,
                EventPayload::ExecutionCompleted {
                    success: status == EndStatus::Success,
                    final_node_id: Some(end_node_id),
                    output: state.output(),
                },
            );
        }
        let mut state = state;
        state.current_node_id = None;
        Ok(RunOutcome::Terminal(ExecutionResult::Completed {
            status,
            state,
        }))
    }

    async fn finish_failed(
        &self,
        mode: &RunMode,
        workflow: &Workflow,
        execution_id: Uuid,
        state: HensuState,
        reason: String,
    ) -> DomainResult<RunOutcome> {
        tracing::error!(execution_id = %execution_id, reason = %reason, "Execution failed");
        self.save_terminal(mode, workflow, execution_id, &state, CheckpointReason::Failed)
            .await?;
        if mode.is_root() {
            self.broadcaster.publish_to(
                execution_id,
                EventPayload::ExecutionCompleted {
                    success: false,
                    final_node_id: None,
                    output: state.output(),
                },
            );
        }
        let mut state = state;
        state.current_node_id = None;
        Ok(RunOutcome::Terminal(ExecutionResult::Failed {
            reason,
            state,
        }))
    }

    async fn finish_rejected(
        &self,
        mode: &RunMode,
        workflow: &Workflow,
        execution_id: Uuid,
        state: HensuState,
        reason: String,
    ) -> DomainResult<RunOutcome> {
        self.save_terminal(
            mode,
            workflow,
            execution_id,
            &state,
            CheckpointReason::Rejected,
        )
        .await?;
        if mode.is_root() {
            self.broadcaster.publish_to(
                execution_id,
                EventPayload::ExecutionCompleted {
                    success: false,
                    final_node_id: None,
                    output: state.output(),
                },
            );
        }
        let mut state = state;
        state.current_node_id = None;
        Ok(RunOutcome::Terminal(ExecutionResult::Rejected {
            reason,
            state,
        }))
    }

    async fn finish_cancelled(
        &self,
        mode: &RunMode,
        workflow: &Workflow,
        execution_id: Uuid,
        state: HensuState,
    ) -> DomainResult<RunOutcome> {
        self.save_terminal(
            mode,
            workflow,
            execution_id,
            &state,
            CheckpointReason::Cancelled,
        )
        .await?;
        if mode.is_root() {
            self.broadcaster.publish_to(
                execution_id,
                EventPayload::ExecutionCompleted {
                    success: false,
                    final_node_id: None,
                    output: state.output(),
                },
            );
        }
        let mut state = state;
        state.current_node_id = None;
        Ok(RunOutcome::Terminal(ExecutionResult::Cancelled { state }))
    }

    async fn save_terminal(
        &self,
        mode: &RunMode,
        workflow: &Workflow,
        execution_id: Uuid,
        state: &HensuState,
        reason: CheckpointReason,
    ) -> DomainResult<()> {
        let RunMode::Root { tenant_id } = mode else {
            return Ok(());
        };
        let snapshot = HensuSnapshot::terminal(
            tenant_id,
            execution_id,
            &workflow.id,
            state.clone(),
            reason,
        );
        self.snapshots.save(&snapshot).await
    }
}

enum PlanReviewOutcome {
    Approved,
    Pending,
    Rejected { reason: String },
    Backtrack { target: String, reason: String },
}

// ============================================================================
// Branch spawning
// ============================================================================

struct ExecutorBranchSpawner {
    executor: Arc<WorkflowExecutor>,
    execution_id: Uuid,
}

impl BranchSpawner for ExecutorBranchSpawner {
    fn spawn_branch(
        &self,
        workflow: Arc<Workflow>,
        target: String,
        context: HashMap<String, serde_json::Value>,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, BranchOutcome> {
        let executor = self.executor.clone();
        let execution_id = self.execution_id;
        async move {
            // Branch events route to the parent execution's stream.
            run_as(execution_id, async move {
                let state = HensuState::new(&target, context);
                let outcome = executor
                    .advance(RunMode::Branch, workflow, execution_id, state, None, cancel)
                    .await;
                match outcome {
                    Ok(RunOutcome::Terminal(result)) => branch_outcome(&target, result),
                    Ok(RunOutcome::Paused { .. }) => {
                        BranchOutcome::failed(&target, "branch paused unexpectedly")
                    }
                    Err(e) => BranchOutcome::failed(&target, e.to_string()),
                }
            })
            .await
        }
        .boxed()
    }
}

/// A branch's output is the output of the last step it executed.
fn branch_outcome(target: &str, result: ExecutionResult) -> BranchOutcome {
    let output = last_step_output(result.state());
    match result {
        ExecutionResult::Completed {
            status: EndStatus::Success,
            ..
        } => BranchOutcome {
            target: target.to_string(),
            success: true,
            output,
            error: None,
        },
        ExecutionResult::Completed { status, .. } => {
            BranchOutcome::failed(target, format!("branch ended with status {}", status))
        }
        ExecutionResult::Rejected { reason, .. } | ExecutionResult::Failed { reason, .. } => {
            BranchOutcome::failed(target, reason)
        }
        ExecutionResult::Cancelled { .. } => BranchOutcome::failed(target, "branch cancelled"),
    }
}

fn last_step_output(state: &HensuState) -> serde_json::Value {
    state
        .history
        .iter()
        .rev()
        .find_map(|entry| match entry {
            crate::domain::models::state::HistoryEntry::Step(step)
                if step.outcome == NodeOutcome::Success =>
            {
                Some(step.output.clone())
            }
            _ => None,
        })
        .unwrap_or(serde_json::Value::Null)
}

// ============================================================================
// Transition selection
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// A score condition matched.
    Score(String),
    /// A plain routing transition matched.
    Target(String),
    /// A failure transition matched; retry bookkeeping applies.
    Retry { max_retries: u32, target: String },
    None,
}

/// Deterministic transition selection.
///
/// Score transitions are consulted first when a rubric was evaluated on
/// this node (conditions in declared order, first match wins); then the
/// first transition compatible with the outcome. Consensus and Complete
/// route like Success; NoConsensus routes like Failure but without retry.
pub fn select_transition(
    transitions: &[Transition],
    outcome: NodeOutcome,
    rubric: Option<&RubricEvaluation>,
) -> Selection {
    if let Some(rubric) = rubric {
        for transition in transitions {
            if let Transition::Score { conditions } = transition {
                for condition in conditions {
                    if condition.matches(rubric.score) {
                        return Selection::Score(condition.target.clone());
                    }
                }
            }
        }
    }

    match outcome {
        NodeOutcome::Success => {
            for transition in transitions {
                match transition {
                    Transition::Success { target }
                    | Transition::Consensus { target }
                    | Transition::Complete { target } => {
                        return Selection::Target(target.clone());
                    }
                    _ => {}
                }
            }
        }
        NodeOutcome::Failure => {
            for transition in transitions {
                match transition {
                    Transition::Failure {
                        max_retries,
                        target,
                    } => {
                        return Selection::Retry {
                            max_retries: *max_retries,
                            target: target.clone(),
                        };
                    }
                    Transition::NoConsensus { target } => {
                        return Selection::Target(target.clone());
                    }
                    _ => {}
                }
            }
        }
    }

    Selection::None
}

fn review_config(node: &Node) -> crate::domain::models::workflow::ReviewConfig {
    match node {
        Node::Standard { review, .. } => *review,
        _ => crate::domain::models::workflow::ReviewConfig::default(),
    }
}

/// Whether a plan for this node is parked and not yet approved.
fn has_pending_plan(state: &HensuState, node_id: &str) -> bool {
    if state
        .context
        .get(PLAN_APPROVED_KEY)
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
    {
        return false;
    }
    state
        .context
        .get(PENDING_PLAN_KEY)
        .and_then(|v| v.get("nodeId"))
        .and_then(serde_json::Value::as_str)
        == Some(node_id)
}

fn take_pending_review(state: &mut HensuState, node_id: &str) -> Option<PendingReview> {
    let pending: PendingReview =
        serde_json::from_value(state.context.get(PENDING_REVIEW_KEY)?.clone()).ok()?;
    if pending.node_id != node_id {
        return None;
    }
    state.context.remove(PENDING_REVIEW_KEY);
    Some(pending)
}
