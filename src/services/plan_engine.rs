//! Plan execution inside a node.
//!
//! Static plans run their declared steps in order and fail fast. Dynamic
//! plans are generated by the planner port, bounded by the node's
//! constraints (step count, replan count, wall-clock duration, token
//! budget), and may be regenerated after a step failure until the replan
//! budget runs out. Lifecycle events are published on the owning
//! execution's stream.

use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::adapters::agents::AgentRegistry;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::plan::{Plan, PlanStep, StepStatus};
use crate::domain::models::workflow::{ActionSpec, PlanConstraints, PlanSpec, PlanStepSpec, Workflow};
use crate::domain::ports::{Planner, PlannerError};
use crate::services::action_dispatcher::ActionDispatcher;
use crate::services::event_broadcaster::{EventBroadcaster, EventPayload};
use crate::services::template;

/// Context key carrying a plan parked for review.
pub const PENDING_PLAN_KEY: &str = "_pending_plan";
/// Context key set when a parked plan has been approved.
pub const PLAN_APPROVED_KEY: &str = "_plan_approved";

/// Result of running a node's plan.
#[derive(Debug)]
pub enum PlanRun {
    Completed {
        success: bool,
        output: String,
        plan: Plan,
    },
    /// Dynamic plan generated with `review: true`; execution must pause.
    AwaitingReview { plan: Plan },
}

pub struct PlanEngine {
    planner: Option<Arc<dyn Planner>>,
    actions: Arc<ActionDispatcher>,
    agents: Arc<AgentRegistry>,
    broadcaster: Arc<EventBroadcaster>,
}

impl PlanEngine {
    pub fn new(
        planner: Option<Arc<dyn Planner>>,
        actions: Arc<ActionDispatcher>,
        agents: Arc<AgentRegistry>,
        broadcaster: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            planner,
            actions,
            agents,
            broadcaster,
        }
    }

    /// Execute a node's plan. `context` is the live execution context; an
    /// approved pending plan found there is consumed instead of replanning.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        node_id: &str,
        spec: &PlanSpec,
        context: &mut HashMap<String, serde_json::Value>,
        cancel: &CancellationToken,
    ) -> DomainResult<PlanRun> {
        match spec {
            PlanSpec::Static { steps } => {
                let plan = Self::materialise(node_id, None, steps);
                self.announce(&plan);
                let constraints = PlanConstraints {
                    max_replans: 0,
                    ..PlanConstraints::default()
                };
                self.run_plan(workflow, plan, &constraints, None, context, cancel)
                    .await
            }
            PlanSpec::Dynamic {
                goal,
                constraints,
                review,
            } => {
                if let Some(plan) = take_approved_plan(node_id, context) {
                    self.announce(&plan);
                    return self
                        .run_plan(workflow, plan, constraints, Some(goal.clone()), context, cancel)
                        .await;
                }

                let plan = match self.generate(workflow, node_id, goal, constraints, context).await {
                    Ok(plan) => plan,
                    Err(PlannerError::NotConfigured) => {
                        return Ok(PlanRun::Completed {
                            success: false,
                            output: "dynamic planning requested but no planner is configured"
                                .to_string(),
                            plan: Plan::new(node_id, Some(goal.clone()), vec![]),
                        });
                    }
                    Err(PlannerError::PlanningFailed(msg)) => {
                        return Ok(PlanRun::Completed {
                            success: false,
                            output: format!("planning failed: {}", msg),
                            plan: Plan::new(node_id, Some(goal.clone()), vec![]),
                        });
                    }
                };
                self.announce(&plan);

                if *review {
                    return Ok(PlanRun::AwaitingReview { plan });
                }

                self.run_plan(workflow, plan, constraints, Some(goal.clone()), context, cancel)
                    .await
            }
        }
    }

    async fn generate(
        &self,
        workflow: &Workflow,
        node_id: &str,
        goal: &str,
        constraints: &PlanConstraints,
        context: &HashMap<String, serde_json::Value>,
    ) -> Result<Plan, PlannerError> {
        let planner = self.planner.as_ref().ok_or(PlannerError::NotConfigured)?;
        let tools: Vec<String> = workflow.agents.keys().cloned().collect();
        let goal = template::resolve(goal, context);
        let mut steps = planner.plan(&goal, constraints, &tools, context).await?;
        steps.truncate(constraints.max_steps as usize);
        Ok(Self::materialise(node_id, Some(goal), &steps))
    }

    fn materialise(node_id: &str, goal: Option<String>, specs: &[PlanStepSpec]) -> Plan {
        let steps = specs
            .iter()
            .enumerate()
            .map(|(i, s)| PlanStep::new(i, &s.tool, s.args.clone()))
            .collect();
        Plan::new(node_id, goal, steps)
    }

    fn announce(&self, plan: &Plan) {
        if let Some(execution_id) = crate::services::event_broadcaster::current_execution() {
            self.broadcaster.register_plan(plan.id, execution_id);
        }
        self.broadcaster.publish_for_plan(
            plan.id,
            EventPayload::PlanCreated {
                plan_id: plan.id,
                node_id: plan.node_id.clone(),
                step_count: plan.steps.len(),
            },
        );
    }

    /// Run the plan's steps, replanning on failure while the budget allows.
    async fn run_plan(
        &self,
        workflow: &Workflow,
        mut plan: Plan,
        constraints: &PlanConstraints,
        goal: Option<String>,
        context: &mut HashMap<String, serde_json::Value>,
        cancel: &CancellationToken,
    ) -> DomainResult<PlanRun> {
        let deadline =
            tokio::time::Instant::now() + std::time::Duration::from_millis(constraints.max_duration_ms);
        let mut replans = 0u32;

        loop {
            match self
                .run_steps(workflow, &mut plan, deadline, context, cancel)
                .await?
            {
                StepsOutcome::AllSucceeded { output } => {
                    self.finish(&plan, true);
                    return Ok(PlanRun::Completed {
                        success: true,
                        output,
                        plan,
                    });
                }
                StepsOutcome::Failed { step_index, error } => {
                    let can_replan = goal.is_some()
                        && replans < constraints.max_replans
                        && tokio::time::Instant::now() < deadline;
                    if !can_replan {
                        self.finish(&plan, false);
                        return Ok(PlanRun::Completed {
                            success: false,
                            output: error,
                            plan,
                        });
                    }
                    replans += 1;
                    tracing::info!(
                        node = %plan.node_id,
                        replan = replans,
                        failed_step = step_index,
                        "Plan step failed, regenerating plan"
                    );
                    self.finish(&plan, false);

                    let mut planning_context = context.clone();
                    planning_context.insert(
                        "_plan_failure".to_string(),
                        serde_json::json!(format!("step {} failed: {}", step_index, error)),
                    );
                    let goal_text = goal.clone().unwrap_or_default();
                    plan = match self
                        .generate(workflow, &plan.node_id, &goal_text, constraints, &planning_context)
                        .await
                    {
                        Ok(new_plan) => new_plan,
                        Err(e) => {
                            return Ok(PlanRun::Completed {
                                success: false,
                                output: format!("replanning failed: {}", e),
                                plan,
                            });
                        }
                    };
                    self.announce(&plan);
                }
            }
        }
    }

    async fn run_steps(
        &self,
        workflow: &Workflow,
        plan: &mut Plan,
        deadline: tokio::time::Instant,
        context: &mut HashMap<String, serde_json::Value>,
        cancel: &CancellationToken,
    ) -> DomainResult<StepsOutcome> {
        let mut last_output = String::new();
        let plan_id = plan.id;

        for i in 0..plan.steps.len() {
            if cancel.is_cancelled() {
                return Err(DomainError::Cancelled);
            }
            if tokio::time::Instant::now() >= deadline {
                plan.steps[i].status = StepStatus::Skipped;
                return Ok(StepsOutcome::Failed {
                    step_index: i,
                    error: "plan exceeded its duration budget".to_string(),
                });
            }

            let tool = plan.steps[i].tool.clone();
            self.broadcaster.publish_for_plan(
                plan_id,
                EventPayload::PlanStepStarted {
                    plan_id,
                    step_index: i,
                    tool: tool.clone(),
                },
            );

            let args = resolve_args(&plan.steps[i].args, context);
            let result = self.run_step(workflow, &tool, &args, context).await?;

            let success = result.is_ok();
            self.broadcaster.publish_for_plan(
                plan_id,
                EventPayload::PlanStepCompleted {
                    plan_id,
                    step_index: i,
                    success,
                },
            );

            match result {
                Ok(output) => {
                    plan.steps[i].status = StepStatus::Success;
                    plan.steps[i].output = Some(output.clone());
                    if !output.is_empty() {
                        last_output = output;
                    }
                }
                Err(error) => {
                    plan.steps[i].status = StepStatus::Failure;
                    plan.steps[i].error = Some(error.clone());
                    for later in plan.steps.iter_mut().skip(i + 1) {
                        later.status = StepStatus::Skipped;
                    }
                    return Ok(StepsOutcome::Failed {
                        step_index: i,
                        error,
                    });
                }
            }
        }

        Ok(StepsOutcome::AllSucceeded { output: last_output })
    }

    /// Route one step: a registered action handler wins; otherwise a
    /// declared agent is invoked with the templated args.
    async fn run_step(
        &self,
        workflow: &Workflow,
        tool: &str,
        args: &HashMap<String, serde_json::Value>,
        context: &HashMap<String, serde_json::Value>,
    ) -> DomainResult<Result<String, String>> {
        if self.actions.has_handler(tool).await {
            let action = ActionSpec::Send {
                handler: tool.to_string(),
                payload: args.clone(),
            };
            let result = self.actions.dispatch(&action, context).await?;
            return Ok(if result.success {
                Ok(result
                    .output
                    .map(|v| template::stringify(&v))
                    .unwrap_or(result.message))
            } else {
                Err(result.message)
            });
        }

        if workflow.agents.contains_key(tool) {
            let agent = self.agents.resolve(tool).await?;
            let prompt = args
                .get("prompt")
                .map(template::stringify)
                .unwrap_or_else(|| serde_json::to_string(args).unwrap_or_default());
            return Ok(match agent.invoke(&prompt, context).await {
                Ok(reply) => Ok(reply.text),
                Err(e) => Err(e.to_string()),
            });
        }

        Ok(Err(format!("unknown tool: {}", tool)))
    }

    fn finish(&self, plan: &Plan, success: bool) {
        self.broadcaster.publish_for_plan(
            plan.id,
            EventPayload::PlanCompleted {
                plan_id: plan.id,
                success,
            },
        );
        self.broadcaster.unregister_plan(plan.id);
    }
}

enum StepsOutcome {
    AllSucceeded { output: String },
    Failed { step_index: usize, error: String },
}

/// Consume an approved pending plan for this node from the context.
fn take_approved_plan(
    node_id: &str,
    context: &mut HashMap<String, serde_json::Value>,
) -> Option<Plan> {
    let approved = context
        .get(PLAN_APPROVED_KEY)
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    if !approved {
        return None;
    }
    let plan: Plan = serde_json::from_value(context.get(PENDING_PLAN_KEY)?.clone()).ok()?;
    if plan.node_id != node_id {
        return None;
    }
    context.remove(PENDING_PLAN_KEY);
    context.remove(PLAN_APPROVED_KEY);
    Some(plan)
}

fn resolve_args(
    args: &HashMap<String, serde_json::Value>,
    context: &HashMap<String, serde_json::Value>,
) -> HashMap<String, serde_json::Value> {
    args.iter()
        .map(|(k, v)| {
            let resolved = match v {
                serde_json::Value::String(s) => {
                    serde_json::Value::String(template::resolve(s, context))
                }
                other => other.clone(),
            };
            (k.clone(), resolved)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::agents::ScriptedAgent;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn workflow_with_agent(agent_id: &str) -> Workflow {
        serde_json::from_value(serde_json::json!({
            "id": "wf", "version": "1",
            "agents": {agent_id: {}},
            "nodes": {"end": {"nodeType": "END", "status": "SUCCESS"}},
            "startNode": "end"
        }))
        .unwrap()
    }

    fn static_spec(steps: Vec<PlanStepSpec>) -> PlanSpec {
        PlanSpec::Static { steps }
    }

    fn step(tool: &str, args: &[(&str, &str)]) -> PlanStepSpec {
        PlanStepSpec {
            tool: tool.to_string(),
            args: args
                .iter()
                .map(|(k, v)| ((*k).to_string(), serde_json::json!(v)))
                .collect(),
        }
    }

    fn engine(
        planner: Option<Arc<dyn Planner>>,
        agents: Arc<AgentRegistry>,
    ) -> PlanEngine {
        PlanEngine::new(
            planner,
            Arc::new(ActionDispatcher::server()),
            agents,
            Arc::new(EventBroadcaster::default()),
        )
    }

    #[tokio::test]
    async fn test_static_plan_runs_agent_steps_in_order() {
        let agents = Arc::new(AgentRegistry::new());
        let agent = Arc::new(ScriptedAgent::new(vec![
            crate::adapters::agents::ScriptedReply::text("first"),
            crate::adapters::agents::ScriptedReply::text("second"),
        ]));
        agents.register("worker", agent.clone()).await;

        let engine = engine(None, agents);
        let workflow = workflow_with_agent("worker");
        let mut context = HashMap::new();
        context.insert("subject".to_string(), serde_json::json!("tests"));

        let run = engine
            .execute(
                &workflow,
                "n1",
                &static_spec(vec![
                    step("worker", &[("prompt", "draft {subject}")]),
                    step("worker", &[("prompt", "polish")]),
                ]),
                &mut context,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        match run {
            PlanRun::Completed { success, output, plan } => {
                assert!(success);
                assert_eq!(output, "second");
                assert_eq!(plan.completed_steps(), 2);
            }
            PlanRun::AwaitingReview { .. } => panic!("static plans never await review"),
        }
        assert_eq!(agent.invocations()[0], "draft tests");
    }

    #[tokio::test]
    async fn test_static_plan_fails_fast_and_skips_rest() {
        let agents = Arc::new(AgentRegistry::new());
        agents
            .register("worker", Arc::new(ScriptedAgent::always_failing("nope")))
            .await;

        let engine = engine(None, agents);
        let workflow = workflow_with_agent("worker");
        let mut context = HashMap::new();

        let run = engine
            .execute(
                &workflow,
                "n1",
                &static_spec(vec![
                    step("worker", &[("prompt", "a")]),
                    step("worker", &[("prompt", "b")]),
                ]),
                &mut context,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        match run {
            PlanRun::Completed { success, plan, .. } => {
                assert!(!success);
                assert_eq!(plan.steps[0].status, StepStatus::Failure);
                assert_eq!(plan.steps[1].status, StepStatus::Skipped);
            }
            PlanRun::AwaitingReview { .. } => panic!("static plans never await review"),
        }
    }

    struct CountingPlanner {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Planner for CountingPlanner {
        async fn plan(
            &self,
            _goal: &str,
            _constraints: &PlanConstraints,
            _tools: &[String],
            _context: &HashMap<String, serde_json::Value>,
        ) -> Result<Vec<PlanStepSpec>, PlannerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![PlanStepSpec {
                tool: "worker".to_string(),
                args: [("prompt".to_string(), serde_json::json!("go"))]
                    .into_iter()
                    .collect(),
            }])
        }
    }

    #[tokio::test]
    async fn test_dynamic_plan_replans_up_to_budget() {
        let agents = Arc::new(AgentRegistry::new());
        agents
            .register("worker", Arc::new(ScriptedAgent::always_failing("still broken")))
            .await;
        let planner = Arc::new(CountingPlanner {
            calls: AtomicU32::new(0),
        });

        let engine = engine(Some(planner.clone()), agents);
        let workflow = workflow_with_agent("worker");
        let mut context = HashMap::new();

        let spec = PlanSpec::Dynamic {
            goal: "fix it".to_string(),
            constraints: PlanConstraints {
                max_steps: 4,
                max_replans: 2,
                max_duration_ms: 60_000,
                max_token_budget: None,
            },
            review: false,
        };
        let run = engine
            .execute(&workflow, "n1", &spec, &mut context, &CancellationToken::new())
            .await
            .unwrap();

        match run {
            PlanRun::Completed { success, .. } => assert!(!success),
            PlanRun::AwaitingReview { .. } => panic!("review not requested"),
        }
        // Initial plan + two replans.
        assert_eq!(planner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_dynamic_review_parks_the_plan() {
        let agents = Arc::new(AgentRegistry::new());
        let planner = Arc::new(CountingPlanner {
            calls: AtomicU32::new(0),
        });
        let engine = engine(Some(planner), agents);
        let workflow = workflow_with_agent("worker");
        let mut context = HashMap::new();

        let spec = PlanSpec::Dynamic {
            goal: "review me".to_string(),
            constraints: PlanConstraints::default(),
            review: true,
        };
        let run = engine
            .execute(&workflow, "n1", &spec, &mut context, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(run, PlanRun::AwaitingReview { .. }));
    }

    #[tokio::test]
    async fn test_missing_planner_is_a_soft_failure() {
        let agents = Arc::new(AgentRegistry::new());
        let engine = engine(None, agents);
        let workflow = workflow_with_agent("worker");
        let mut context = HashMap::new();

        let spec = PlanSpec::Dynamic {
            goal: "anything".to_string(),
            constraints: PlanConstraints::default(),
            review: false,
        };
        let run = engine
            .execute(&workflow, "n1", &spec, &mut context, &CancellationToken::new())
            .await
            .unwrap();
        match run {
            PlanRun::Completed { success, output, .. } => {
                assert!(!success);
                assert!(output.contains("no planner"));
            }
            PlanRun::AwaitingReview { .. } => panic!("no review requested"),
        }
    }

    #[tokio::test]
    async fn test_approved_pending_plan_is_consumed() {
        let agents = Arc::new(AgentRegistry::new());
        agents
            .register("worker", Arc::new(ScriptedAgent::always("done")))
            .await;
        let engine = engine(None, agents);
        let workflow = workflow_with_agent("worker");

        let pending = Plan::new(
            "n1",
            Some("goal".to_string()),
            vec![PlanStep::new(
                0,
                "worker",
                [("prompt".to_string(), serde_json::json!("run"))]
                    .into_iter()
                    .collect(),
            )],
        );
        let mut context = HashMap::new();
        context.insert(
            PENDING_PLAN_KEY.to_string(),
            serde_json::to_value(&pending).unwrap(),
        );
        context.insert(PLAN_APPROVED_KEY.to_string(), serde_json::json!(true));

        let spec = PlanSpec::Dynamic {
            goal: "goal".to_string(),
            constraints: PlanConstraints::default(),
            review: true,
        };
        let run = engine
            .execute(&workflow, "n1", &spec, &mut context, &CancellationToken::new())
            .await
            .unwrap();
        match run {
            PlanRun::Completed { success, output, .. } => {
                assert!(success);
                assert_eq!(output, "done");
            }
            PlanRun::AwaitingReview { .. } => panic!("approved plan must execute"),
        }
        assert!(!context.contains_key(PENDING_PLAN_KEY));
    }
}
