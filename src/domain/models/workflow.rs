//! Workflow graph domain model.
//!
//! A `Workflow` is an immutable directed graph of typed nodes shared by
//! reference across every execution that runs it. Nodes, transitions, and
//! actions are closed sums serialised with a wire discriminator (`nodeType`
//! for nodes, `type` for transitions and actions); dispatch in the engine is
//! by pattern match, never by reflection.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::rubric::Rubric;

/// An immutable workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub agents: HashMap<String, AgentConfig>,
    pub nodes: HashMap<String, Node>,
    pub start_node: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub rubrics: HashMap<String, Rubric>,
}

/// Per-agent invocation parameters carried by the workflow definition.
///
/// The engine treats this as opaque apart from resolving the registry key;
/// provider adapters interpret the model/temperature fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

// ============================================================================
// Nodes
// ============================================================================

/// A typed node in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "nodeType", rename_all_fields = "camelCase")]
pub enum Node {
    #[serde(rename = "STANDARD")]
    Standard {
        agent_id: String,
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rubric_id: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        output_params: Vec<String>,
        #[serde(default, skip_serializing_if = "ReviewConfig::is_disabled")]
        review: ReviewConfig,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        planning: Option<PlanSpec>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        transitions: Vec<Transition>,
    },
    #[serde(rename = "PARALLEL")]
    Parallel {
        branches: Vec<Branch>,
        consensus: ConsensusSpec,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        transitions: Vec<Transition>,
    },
    #[serde(rename = "FORK")]
    Fork {
        targets: Vec<String>,
        #[serde(default)]
        wait_all: bool,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        transitions: Vec<Transition>,
    },
    #[serde(rename = "JOIN")]
    Join {
        #[serde(rename = "await")]
        awaits: Vec<String>,
        merge_strategy: MergeStrategy,
        output_field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
        #[serde(default)]
        fail_on_any_error: bool,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        transitions: Vec<Transition>,
    },
    #[serde(rename = "GENERIC")]
    Generic {
        executor_type: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        config: HashMap<String, serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rubric_id: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        transitions: Vec<Transition>,
    },
    #[serde(rename = "ACTION")]
    Action {
        actions: Vec<ActionSpec>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        transitions: Vec<Transition>,
    },
    #[serde(rename = "END")]
    End { status: EndStatus },
}

impl Node {
    /// Declared transitions of this node. End nodes have none.
    pub fn transitions(&self) -> &[Transition] {
        match self {
            Self::Standard { transitions, .. }
            | Self::Parallel { transitions, .. }
            | Self::Fork { transitions, .. }
            | Self::Join { transitions, .. }
            | Self::Generic { transitions, .. }
            | Self::Action { transitions, .. } => transitions,
            Self::End { .. } => &[],
        }
    }

    /// Rubric attached to this node, if any.
    pub fn rubric_id(&self) -> Option<&str> {
        match self {
            Self::Standard { rubric_id, .. } | Self::Generic { rubric_id, .. } => {
                rubric_id.as_deref()
            }
            _ => None,
        }
    }

    /// Wire discriminator value for this node type.
    pub fn node_type(&self) -> &'static str {
        match self {
            Self::Standard { .. } => "STANDARD",
            Self::Parallel { .. } => "PARALLEL",
            Self::Fork { .. } => "FORK",
            Self::Join { .. } => "JOIN",
            Self::Generic { .. } => "GENERIC",
            Self::Action { .. } => "ACTION",
            Self::End { .. } => "END",
        }
    }
}

/// How a Join node merges branch outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeStrategy {
    /// Ordered list of branch outputs, in declared target order.
    CollectAll,
    /// First successful output, in completion order.
    FirstSuccess,
    /// String concatenation in declared target order.
    Concatenate,
}

/// Terminal status carried by an End node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndStatus {
    Success,
    Failure,
    Cancelled,
}

impl std::fmt::Display for EndStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

// ============================================================================
// Parallel branches & consensus
// ============================================================================

/// A sibling agent invocation inside a Parallel node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub branch_id: String,
    pub agent_id: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

/// How branch votes are aggregated into a consensus outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConsensusStrategy {
    MajorityVote,
    WeightedVote,
    Unanimous,
    JudgeDecides,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusSpec {
    pub strategy: ConsensusStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

// ============================================================================
// Review
// ============================================================================

/// Human review requirement for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ReviewMode {
    #[default]
    Disabled,
    Optional,
    Required,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReviewConfig {
    #[serde(default)]
    pub mode: ReviewMode,
}

impl ReviewConfig {
    pub fn is_disabled(&self) -> bool {
        self.mode == ReviewMode::Disabled
    }
}

// ============================================================================
// Planning
// ============================================================================

/// Per-node micro-plan: a fixed step sequence or an LLM-generated plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PlanSpec {
    Static {
        steps: Vec<PlanStepSpec>,
    },
    Dynamic {
        goal: String,
        #[serde(default)]
        constraints: PlanConstraints,
        #[serde(default)]
        review: bool,
    },
}

/// One declared plan step. `tool` resolves against registered action
/// handlers first, then against declared agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStepSpec {
    pub tool: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub args: HashMap<String, serde_json::Value>,
}

/// Bounds on dynamic plan generation and execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanConstraints {
    pub max_steps: u32,
    pub max_replans: u32,
    pub max_duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_token_budget: Option<u64>,
}

impl Default for PlanConstraints {
    fn default() -> Self {
        Self {
            max_steps: 8,
            max_replans: 2,
            max_duration_ms: 120_000,
            max_token_budget: None,
        }
    }
}

// ============================================================================
// Actions
// ============================================================================

/// An action dispatched by an Action node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ActionSpec {
    /// Route a payload to a registered handler.
    Send {
        handler: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        payload: HashMap<String, serde_json::Value>,
    },
    /// Run a registered command. Refused in server mode.
    Execute { command: String },
}

// ============================================================================
// Transitions
// ============================================================================

/// An outgoing edge of a node. Evaluated in declared order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Transition {
    Success {
        target: String,
    },
    Failure {
        #[serde(default)]
        max_retries: u32,
        target: String,
    },
    Score {
        conditions: Vec<ScoreCondition>,
    },
    Consensus {
        target: String,
    },
    NoConsensus {
        target: String,
    },
    Complete {
        target: String,
    },
}

/// Comparison operator for score-gated routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreOp {
    #[serde(rename = "GTE")]
    Gte,
    #[serde(rename = "LTE")]
    Lte,
    #[serde(rename = "LT")]
    Lt,
    #[serde(rename = "GT")]
    Gt,
    #[serde(rename = "EQ")]
    Eq,
    #[serde(rename = "RANGE")]
    Range,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreCondition {
    pub op: ScoreOp,
    pub value: f64,
    /// Inclusive upper bound, RANGE only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
    pub target: String,
}

impl ScoreCondition {
    /// Whether a rubric score satisfies this condition.
    pub fn matches(&self, score: f64) -> bool {
        match self.op {
            ScoreOp::Gte => score >= self.value,
            ScoreOp::Lte => score <= self.value,
            ScoreOp::Lt => score < self.value,
            ScoreOp::Gt => score > self.value,
            ScoreOp::Eq => (score - self.value).abs() < f64::EPSILON,
            ScoreOp::Range => {
                score >= self.value && self.upper.is_none_or(|u| score <= u)
            }
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

impl Workflow {
    /// Validate referential integrity of the graph.
    ///
    /// Every transition target, score target, fork target, and join await
    /// must resolve to a declared node; the start node must exist; agents
    /// named by standard nodes, branches, and judges must be declared.
    pub fn validate(&self) -> DomainResult<()> {
        if !self.nodes.contains_key(&self.start_node) {
            return Err(DomainError::ValidationFailed(format!(
                "Start node '{}' is not defined",
                self.start_node
            )));
        }

        for (node_id, node) in &self.nodes {
            for transition in node.transitions() {
                match transition {
                    Transition::Success { target }
                    | Transition::Failure { target, .. }
                    | Transition::Consensus { target }
                    | Transition::NoConsensus { target }
                    | Transition::Complete { target } => {
                        self.require_node(node_id, target)?;
                    }
                    Transition::Score { conditions } => {
                        for condition in conditions {
                            self.require_node(node_id, &condition.target)?;
                        }
                    }
                }
            }

            match node {
                Node::Standard { agent_id, .. } => self.require_agent(node_id, agent_id)?,
                Node::Parallel {
                    branches, consensus, ..
                } => {
                    for branch in branches {
                        self.require_agent(node_id, &branch.agent_id)?;
                    }
                    if let Some(judge) = &consensus.judge_agent_id {
                        self.require_agent(node_id, judge)?;
                    }
                }
                Node::Fork { targets, .. } => {
                    for target in targets {
                        self.require_node(node_id, target)?;
                    }
                }
                Node::Join { awaits, .. } => {
                    for fork_id in awaits {
                        match self.nodes.get(fork_id) {
                            Some(Node::Fork { .. }) => {}
                            Some(_) => {
                                return Err(DomainError::ValidationFailed(format!(
                                    "Join '{}' awaits '{}', which is not a FORK node",
                                    node_id, fork_id
                                )));
                            }
                            None => {
                                return Err(DomainError::ValidationFailed(format!(
                                    "Join '{}' awaits undefined node '{}'",
                                    node_id, fork_id
                                )));
                            }
                        }
                    }
                }
                Node::Generic { .. } | Node::Action { .. } | Node::End { .. } => {}
            }
        }

        Ok(())
    }

    fn require_node(&self, from: &str, target: &str) -> DomainResult<()> {
        if self.nodes.contains_key(target) {
            Ok(())
        } else {
            Err(DomainError::ValidationFailed(format!(
                "Node '{}' references undefined node '{}'",
                from, target
            )))
        }
    }

    fn require_agent(&self, node_id: &str, agent_id: &str) -> DomainResult<()> {
        if self.agents.contains_key(agent_id) {
            Ok(())
        } else {
            Err(DomainError::ValidationFailed(format!(
                "Node '{}' references undeclared agent '{}'",
                node_id, agent_id
            )))
        }
    }

    /// Look up a node by id, failing with `NodeNotFound`.
    pub fn node(&self, node_id: &str) -> DomainResult<&Node> {
        self.nodes
            .get(node_id)
            .ok_or_else(|| DomainError::NodeNotFound(node_id.to_string()))
    }
}
