//! Parallel-branch consensus evaluation.
//!
//! Each branch yields one vote. Branches with a rubric vote by rubric pass;
//! the rest (and any branch whose rubric evaluation errored) vote by keyword
//! heuristic. Strategies aggregate the votes; `judgeDecides` defers to a
//! judge agent whose reply is authoritative.

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapters::agents::AgentRegistry;
use crate::domain::errors::DomainResult;
use crate::domain::models::rubric::RubricEvaluation;
use crate::domain::models::workflow::{Branch, ConsensusSpec, ConsensusStrategy, Workflow};
use crate::services::rubric_engine::RubricEngine;

const DEFAULT_THRESHOLD: f64 = 0.5;

/// One branch's completed run, before vote derivation.
#[derive(Debug, Clone)]
pub struct BranchRun {
    pub branch: Branch,
    pub output: String,
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Approve,
    Reject,
    Abstain,
}

impl std::fmt::Display for Vote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approve => write!(f, "approve"),
            Self::Reject => write!(f, "reject"),
            Self::Abstain => write!(f, "abstain"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BranchVote {
    pub branch_id: String,
    pub vote: Vote,
    pub weight: f64,
    pub score: Option<f64>,
    pub output: String,
}

/// Aggregated consensus outcome for a parallel node.
#[derive(Debug, Clone)]
pub struct ConsensusOutcome {
    pub reached: bool,
    pub votes: Vec<BranchVote>,
}

impl ConsensusOutcome {
    pub fn approvals(&self) -> usize {
        self.votes.iter().filter(|v| v.vote == Vote::Approve).count()
    }

    pub fn rejections(&self) -> usize {
        self.votes.iter().filter(|v| v.vote == Vote::Reject).count()
    }

    pub fn abstentions(&self) -> usize {
        self.votes.iter().filter(|v| v.vote == Vote::Abstain).count()
    }
}

pub struct ConsensusEvaluator {
    rubric_engine: Arc<RubricEngine>,
    agents: Arc<AgentRegistry>,
    approve_keywords: Vec<String>,
    reject_keywords: Vec<String>,
}

impl ConsensusEvaluator {
    pub fn new(
        rubric_engine: Arc<RubricEngine>,
        agents: Arc<AgentRegistry>,
        approve_keywords: Vec<String>,
        reject_keywords: Vec<String>,
    ) -> Self {
        Self {
            rubric_engine,
            agents,
            approve_keywords,
            reject_keywords,
        }
    }

    /// Aggregate branch outcomes under the node's strategy. Branch order is
    /// the declared order, not completion order.
    pub async fn evaluate(
        &self,
        workflow: &Workflow,
        runs: &[BranchRun],
        spec: &ConsensusSpec,
        context: &HashMap<String, serde_json::Value>,
    ) -> DomainResult<ConsensusOutcome> {
        let mut votes = Vec::with_capacity(runs.len());
        for run in runs {
            votes.push(self.derive_vote(workflow, run, context).await);
        }

        if votes.is_empty() {
            return Ok(ConsensusOutcome {
                reached: false,
                votes,
            });
        }

        let threshold = spec.threshold.unwrap_or(DEFAULT_THRESHOLD);
        let reached = match spec.strategy {
            ConsensusStrategy::MajorityVote => {
                let total = votes.len();
                let needed = (total as f64 * threshold).ceil() as usize;
                let approvals = votes.iter().filter(|v| v.vote == Vote::Approve).count();
                approvals >= needed.max(1)
            }
            ConsensusStrategy::WeightedVote => {
                let approve_weight: f64 = votes
                    .iter()
                    .filter(|v| v.vote == Vote::Approve)
                    .map(|v| v.weight)
                    .sum();
                let decided_weight: f64 = votes
                    .iter()
                    .filter(|v| v.vote != Vote::Abstain)
                    .map(|v| v.weight)
                    .sum();
                decided_weight > 0.0 && approve_weight / decided_weight > threshold
            }
            ConsensusStrategy::Unanimous => votes.iter().all(|v| v.vote == Vote::Approve),
            ConsensusStrategy::JudgeDecides => {
                self.judge_decides(workflow, spec, &votes, context).await?
            }
        };

        Ok(ConsensusOutcome { reached, votes })
    }

    /// Derive one branch's vote: rubric pass/fail when declared, keyword
    /// heuristic otherwise or when the rubric evaluation errors.
    async fn derive_vote(
        &self,
        workflow: &Workflow,
        run: &BranchRun,
        context: &HashMap<String, serde_json::Value>,
    ) -> BranchVote {
        let weight = run.branch.weight.unwrap_or(1.0);

        if !run.success {
            return BranchVote {
                branch_id: run.branch.branch_id.clone(),
                vote: Vote::Reject,
                weight,
                score: None,
                output: run.output.clone(),
            };
        }

        if let Some(rubric_id) = &run.branch.rubric_id {
            match self
                .rubric_engine
                .evaluate(workflow, rubric_id, &run.output, context)
                .await
            {
                Ok(RubricEvaluation { score, passed, .. }) => {
                    return BranchVote {
                        branch_id: run.branch.branch_id.clone(),
                        vote: if passed { Vote::Approve } else { Vote::Reject },
                        weight,
                        score: Some(score),
                        output: run.output.clone(),
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        branch = %run.branch.branch_id,
                        error = %e,
                        "Branch rubric evaluation failed, falling back to keyword heuristic"
                    );
                }
            }
        }

        BranchVote {
            branch_id: run.branch.branch_id.clone(),
            vote: self.keyword_vote(&run.output),
            weight,
            score: None,
            output: run.output.clone(),
        }
    }

    /// Keyword classification. Rejection tokens win over approval tokens
    /// when both appear.
    fn keyword_vote(&self, text: &str) -> Vote {
        let lowered = text.to_lowercase();
        if self.reject_keywords.iter().any(|kw| lowered.contains(kw.as_str())) {
            Vote::Reject
        } else if self
            .approve_keywords
            .iter()
            .any(|kw| lowered.contains(kw.as_str()))
        {
            Vote::Approve
        } else {
            Vote::Abstain
        }
    }

    async fn judge_decides(
        &self,
        workflow: &Workflow,
        spec: &ConsensusSpec,
        votes: &[BranchVote],
        context: &HashMap<String, serde_json::Value>,
    ) -> DomainResult<bool> {
        let Some(judge_id) = &spec.judge_agent_id else {
            tracing::warn!("judgeDecides strategy without a judge agent; no consensus");
            return Ok(false);
        };
        let judge = self.agents.resolve(judge_id).await?;

        let mut prompt = String::from(
            "You are the deciding judge for a set of parallel branch outputs.\n\
             Reply with a single word, APPROVE or REJECT.\n\n",
        );
        for vote in votes {
            prompt.push_str(&format!("--- branch {} ---\n{}\n\n", vote.branch_id, vote.output));
        }

        match judge.invoke(&prompt, context).await {
            Ok(reply) => Ok(self.keyword_vote(&reply.text) == Vote::Approve),
            Err(e) => {
                tracing::warn!(judge = %judge_id, error = %e, "Judge invocation failed; no consensus");
                Ok(false)
            }
        }
    }
}
