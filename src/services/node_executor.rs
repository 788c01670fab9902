//! Per-node-type execution.
//!
//! The dispatcher owns the leaf engines (agents, rubrics, actions, plans,
//! consensus) and executes one node at a time against the execution state.
//! Fork branches are sub-traversals; their futures are built by the
//! [`BranchSpawner`] the workflow executor implements, so the dispatcher
//! stays free of the traversal loop.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::adapters::agents::AgentRegistry;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::plan::Plan;
use crate::domain::models::state::{HensuState, NodeResult};
use crate::domain::models::workflow::{ActionSpec, Branch, Node, PlanSpec, Workflow};
use crate::domain::ports::GenericHandler;
use crate::services::action_dispatcher::ActionDispatcher;
use crate::services::consensus::{BranchRun, ConsensusEvaluator};
use crate::services::extractor;
use crate::services::fork_join::{BranchOutcome, ForkHandle, ForkTable};
use crate::services::plan_engine::{PlanEngine, PlanRun};
use crate::services::rubric_engine::{RubricEngine, RubricError};
use crate::services::template;

/// Context key receiving rubric recommendations for failed evaluations.
const RECOMMENDATIONS_KEY: &str = "self_evaluation_recommendations";

/// Builds the future for one fork branch sub-traversal.
pub trait BranchSpawner: Send + Sync {
    fn spawn_branch(
        &self,
        workflow: Arc<Workflow>,
        target: String,
        context: HashMap<String, serde_json::Value>,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, BranchOutcome>;
}

/// Outcome of dispatching one node.
#[derive(Debug)]
pub enum NodeExecution {
    Result(NodeResult),
    /// A dynamic plan was generated for review; the execution must pause.
    AwaitingPlanReview { plan: Plan },
}

pub struct NodeExecutor {
    agents: Arc<AgentRegistry>,
    rubric_engine: Arc<RubricEngine>,
    actions: Arc<ActionDispatcher>,
    plan_engine: Arc<PlanEngine>,
    consensus: Arc<ConsensusEvaluator>,
    generic_handlers: RwLock<HashMap<String, Arc<dyn GenericHandler>>>,
    default_join_timeout: Duration,
}

impl NodeExecutor {
    pub fn new(
        agents: Arc<AgentRegistry>,
        rubric_engine: Arc<RubricEngine>,
        actions: Arc<ActionDispatcher>,
        plan_engine: Arc<PlanEngine>,
        consensus: Arc<ConsensusEvaluator>,
        default_join_timeout: Duration,
    ) -> Self {
        Self {
            agents,
            rubric_engine,
            actions,
            plan_engine,
            consensus,
            generic_handlers: RwLock::new(HashMap::new()),
            default_join_timeout,
        }
    }

    /// Register a handler for Generic nodes under an executor type.
    pub async fn register_generic_handler(
        &self,
        executor_type: impl Into<String>,
        handler: Arc<dyn GenericHandler>,
    ) {
        self.generic_handlers
            .write()
            .await
            .insert(executor_type.into(), handler);
    }

    /// Execute one node. Fatal conditions (missing agent/handler/rubric)
    /// come back as errors; everything else is a result.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &self,
        workflow: &Arc<Workflow>,
        node_id: &str,
        node: &Node,
        state: &mut HensuState,
        forks: &mut ForkTable,
        spawner: &dyn BranchSpawner,
        cancel: &CancellationToken,
    ) -> DomainResult<NodeExecution> {
        match node {
            Node::Standard {
                agent_id,
                prompt,
                rubric_id,
                output_params,
                planning,
                ..
            } => {
                self.execute_standard(
                    workflow,
                    node_id,
                    agent_id,
                    prompt,
                    rubric_id.as_deref(),
                    output_params,
                    planning.as_ref(),
                    state,
                    cancel,
                )
                .await
            }
            Node::Parallel {
                branches,
                consensus,
                ..
            } => {
                let result = self
                    .execute_parallel(workflow, branches, consensus, state, cancel)
                    .await?;
                Ok(NodeExecution::Result(result))
            }
            Node::Fork {
                targets, wait_all, ..
            } => {
                let result = self
                    .execute_fork(workflow, node_id, targets, *wait_all, state, forks, spawner, cancel)
                    .await;
                Ok(NodeExecution::Result(result))
            }
            Node::Join {
                awaits,
                merge_strategy,
                output_field,
                timeout_ms,
                fail_on_any_error,
                ..
            } => {
                let timeout = timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(self.default_join_timeout);
                let resolution = forks
                    .join(awaits, *merge_strategy, timeout, *fail_on_any_error)
                    .await;
                let result = if resolution.success {
                    state
                        .context
                        .insert(output_field.clone(), resolution.value.clone());
                    NodeResult::success(resolution.value)
                } else {
                    NodeResult::failure(
                        resolution
                            .error
                            .unwrap_or_else(|| "join failed".to_string()),
                    )
                };
                Ok(NodeExecution::Result(result))
            }
            Node::Generic {
                executor_type,
                config,
                rubric_id,
                ..
            } => {
                self.execute_generic(
                    workflow,
                    node_id,
                    executor_type,
                    config,
                    rubric_id.as_deref(),
                    state,
                )
                .await
            }
            Node::Action { actions, .. } => {
                let result = self.execute_actions(actions, state).await?;
                Ok(NodeExecution::Result(result))
            }
            Node::End { status } => {
                // The executor terminates on End nodes before dispatching;
                // this arm only serves direct dispatch in tests.
                Ok(NodeExecution::Result(NodeResult::success(
                    status.to_string(),
                )))
            }
        }
    }

    // ========================================================================
    // Standard
    // ========================================================================

    #[allow(clippy::too_many_arguments)]
    async fn execute_standard(
        &self,
        workflow: &Arc<Workflow>,
        node_id: &str,
        agent_id: &str,
        prompt: &str,
        rubric_id: Option<&str>,
        output_params: &[String],
        planning: Option<&PlanSpec>,
        state: &mut HensuState,
        cancel: &CancellationToken,
    ) -> DomainResult<NodeExecution> {
        let resolved_prompt = template::resolve(prompt, &state.context);

        let (success, output_text) = if let Some(spec) = planning {
            match self
                .plan_engine
                .execute(workflow, node_id, spec, &mut state.context, cancel)
                .await?
            {
                PlanRun::Completed {
                    success, output, ..
                } => (success, output),
                PlanRun::AwaitingReview { plan } => {
                    return Ok(NodeExecution::AwaitingPlanReview { plan });
                }
            }
        } else {
            let agent = self.agents.resolve(agent_id).await?;
            let invocation = tokio::select! {
                _ = cancel.cancelled() => return Err(DomainError::Cancelled),
                reply = agent.invoke(&resolved_prompt, &state.context) => reply,
            };
            match invocation {
                Ok(reply) => (true, reply.text),
                Err(e) => (false, e.to_string()),
            }
        };

        let mut result = if success {
            state.context.insert(
                node_id.to_string(),
                serde_json::Value::String(output_text.clone()),
            );
            extractor::extract_output_params(&output_text, output_params, &mut state.context);
            NodeResult::success(output_text.clone())
        } else {
            NodeResult::failure(output_text.clone())
        };

        if let Some(rubric_id) = rubric_id {
            if success {
                result = self
                    .apply_rubric(workflow, rubric_id, &output_text, state, result)
                    .await?;
            }
        }

        Ok(NodeExecution::Result(result))
    }

    /// Evaluate the node's rubric and attach it to the result. A missing
    /// rubric is fatal; an evaluation error downgrades the result.
    async fn apply_rubric(
        &self,
        workflow: &Arc<Workflow>,
        rubric_id: &str,
        output: &str,
        state: &mut HensuState,
        result: NodeResult,
    ) -> DomainResult<NodeResult> {
        match self
            .rubric_engine
            .evaluate(workflow, rubric_id, output, &state.context)
            .await
        {
            Ok(evaluation) => {
                if !evaluation.passed {
                    if let Some(recommendation) = &evaluation.recommendation {
                        state.context.insert(
                            RECOMMENDATIONS_KEY.to_string(),
                            serde_json::Value::String(recommendation.clone()),
                        );
                    }
                }
                Ok(result.with_rubric(evaluation))
            }
            Err(RubricError::NotFound(id)) => Err(DomainError::RubricNotFound(id)),
            Err(RubricError::Evaluation(msg)) => {
                tracing::warn!(rubric = %rubric_id, error = %msg, "Rubric evaluation failed");
                Ok(NodeResult::failure(format!(
                    "rubric evaluation failed: {}",
                    msg
                )))
            }
        }
    }

    // ========================================================================
    // Parallel
    // ========================================================================

    async fn execute_parallel(
        &self,
        workflow: &Arc<Workflow>,
        branches: &[Branch],
        consensus: &crate::domain::models::workflow::ConsensusSpec,
        state: &mut HensuState,
        cancel: &CancellationToken,
    ) -> DomainResult<NodeResult> {
        // Resolve every branch agent up front so a missing agent is fatal
        // before any branch runs.
        let mut invocations = Vec::with_capacity(branches.len());
        for branch in branches {
            let agent = self.agents.resolve(&branch.agent_id).await?;
            let prompt = template::resolve(&branch.prompt, &state.context);
            invocations.push((branch.clone(), agent, prompt));
        }

        // Branches share the parent context by value and run concurrently;
        // outputs are collected in declared order.
        let context = state.context.clone();
        let futures = invocations.into_iter().map(|(branch, agent, prompt)| {
            let context = context.clone();
            async move {
                let reply = agent.invoke(&prompt, &context).await;
                match reply {
                    Ok(reply) => BranchRun {
                        branch,
                        output: reply.text,
                        success: true,
                    },
                    Err(e) => BranchRun {
                        branch,
                        output: e.to_string(),
                        success: false,
                    },
                }
            }
        });
        let runs = tokio::select! {
            _ = cancel.cancelled() => return Err(DomainError::Cancelled),
            runs = futures::future::join_all(futures) => runs,
        };

        let outcome = self
            .consensus
            .evaluate(workflow, &runs, consensus, &state.context)
            .await?;

        let outputs: Vec<serde_json::Value> = runs
            .iter()
            .map(|r| serde_json::Value::String(r.output.clone()))
            .collect();
        let mut result = if outcome.reached {
            NodeResult::success(serde_json::Value::Array(outputs))
        } else {
            let mut failed = NodeResult::failure("no consensus reached");
            failed.output = serde_json::Value::Array(outputs);
            failed
        };
        result.metadata.insert(
            "consensus".to_string(),
            serde_json::json!({
                "reached": outcome.reached,
                "approvals": outcome.approvals(),
                "rejections": outcome.rejections(),
                "abstentions": outcome.abstentions(),
            }),
        );
        Ok(result)
    }

    // ========================================================================
    // Fork
    // ========================================================================

    #[allow(clippy::too_many_arguments)]
    async fn execute_fork(
        &self,
        workflow: &Arc<Workflow>,
        node_id: &str,
        targets: &[String],
        wait_all: bool,
        state: &mut HensuState,
        forks: &mut ForkTable,
        spawner: &dyn BranchSpawner,
        cancel: &CancellationToken,
    ) -> NodeResult {
        let branches = targets
            .iter()
            .map(|target| {
                // Copy-on-fork: each branch gets its own context snapshot
                // and a child cancellation token.
                let fut = spawner.spawn_branch(
                    workflow.clone(),
                    target.clone(),
                    state.context.clone(),
                    cancel.child_token(),
                );
                (target.clone(), fut)
            })
            .collect();

        let mut handle = ForkHandle::spawn(node_id, branches);
        if wait_all {
            handle.wait_all().await;
        }
        forks.insert(handle);

        let mut result = NodeResult::success(serde_json::json!({ "targets": targets }));
        result
            .metadata
            .insert("waitAll".to_string(), serde_json::json!(wait_all));
        result
    }

    // ========================================================================
    // Generic
    // ========================================================================

    async fn execute_generic(
        &self,
        workflow: &Arc<Workflow>,
        node_id: &str,
        executor_type: &str,
        config: &HashMap<String, serde_json::Value>,
        rubric_id: Option<&str>,
        state: &mut HensuState,
    ) -> DomainResult<NodeExecution> {
        let handler = self
            .generic_handlers
            .read()
            .await
            .get(executor_type)
            .cloned()
            .ok_or_else(|| DomainError::HandlerNotFound(executor_type.to_string()))?;

        let mut result = handler.handle(config, &state.context).await;
        if result.is_success() {
            state
                .context
                .insert(node_id.to_string(), result.output.clone());
            if let Some(rubric_id) = rubric_id {
                let output_text = template::stringify(&result.output);
                result = self
                    .apply_rubric(workflow, rubric_id, &output_text, state, result)
                    .await?;
            }
        }
        Ok(NodeExecution::Result(result))
    }

    // ========================================================================
    // Action
    // ========================================================================

    async fn execute_actions(
        &self,
        actions: &[ActionSpec],
        state: &mut HensuState,
    ) -> DomainResult<NodeResult> {
        let mut messages = Vec::with_capacity(actions.len());
        for action in actions {
            let result = self.actions.dispatch(action, &state.context).await?;
            if !result.success {
                return Ok(NodeResult::failure(result.message));
            }
            messages.push(result.message);
        }
        Ok(NodeResult::success(serde_json::json!(messages)))
    }
}
