//! Rubric evaluation.
//!
//! Two modes: self-scored (parse a score out of the node's own output) and
//! LLM-judge (ask a designated evaluator agent and parse its reply the same
//! way). Evaluation errors are surfaced, never swallowed, so callers can
//! fall back to their own heuristics.

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapters::agents::AgentRegistry;
use crate::domain::models::rubric::{Rubric, RubricEvaluation, RubricEvaluator};
use crate::domain::models::workflow::Workflow;
use crate::domain::ports::RubricRepository;
use crate::services::extractor::first_json_object;
use crate::services::template;

/// Score fields recognised in agent/judge output, in lookup order.
const SCORE_FIELDS: [&str; 4] = ["score", "self_score", "quality_score", "final_score"];

/// Score assigned when output carries no recognisable score field.
const FALLBACK_SCORE: f64 = 50.0;

#[derive(Debug, thiserror::Error)]
pub enum RubricError {
    /// Fatal: the rubric id is not registered anywhere.
    #[error("Rubric not found: {0}")]
    NotFound(String),

    /// Non-fatal: the evaluation itself failed (judge error, bad reply).
    #[error("Rubric evaluation failed: {0}")]
    Evaluation(String),
}

pub struct RubricEngine {
    rubrics: Arc<dyn RubricRepository>,
    agents: Arc<AgentRegistry>,
    reject_keywords: Vec<String>,
}

impl RubricEngine {
    pub fn new(
        rubrics: Arc<dyn RubricRepository>,
        agents: Arc<AgentRegistry>,
        reject_keywords: Vec<String>,
    ) -> Self {
        Self {
            rubrics,
            agents,
            reject_keywords,
        }
    }

    /// Evaluate a node's output against a rubric.
    ///
    /// The workflow-local rubric mapping takes precedence over the shared
    /// repository.
    pub async fn evaluate(
        &self,
        workflow: &Workflow,
        rubric_id: &str,
        output: &str,
        context: &HashMap<String, serde_json::Value>,
    ) -> Result<RubricEvaluation, RubricError> {
        let rubric = self.find_rubric(workflow, rubric_id).await?;

        match &rubric.evaluator {
            RubricEvaluator::SelfScore => Ok(self.score_text(&rubric, output)),
            RubricEvaluator::Judge { agent_id } => {
                self.judge(&rubric, agent_id, output, context).await
            }
        }
    }

    async fn find_rubric(&self, workflow: &Workflow, rubric_id: &str) -> Result<Rubric, RubricError> {
        if let Some(rubric) = workflow.rubrics.get(rubric_id) {
            return Ok(rubric.clone());
        }
        match self.rubrics.find(rubric_id).await {
            Ok(Some(rubric)) => Ok(rubric),
            Ok(None) => Err(RubricError::NotFound(rubric_id.to_string())),
            Err(e) => Err(RubricError::Evaluation(e.to_string())),
        }
    }

    /// Parse a score out of text, falling back to a conservative default.
    fn score_text(&self, rubric: &Rubric, output: &str) -> RubricEvaluation {
        if let Some(serde_json::Value::Object(fields)) = first_json_object(output) {
            let score = SCORE_FIELDS
                .iter()
                .find_map(|name| fields.get(*name).and_then(serde_json::Value::as_f64));
            if let Some(score) = score {
                let mut eval = RubricEvaluation::new(&rubric.id, score, rubric.pass_threshold);
                if !eval.passed {
                    eval.recommendation = fields
                        .get("recommendation")
                        .and_then(serde_json::Value::as_str)
                        .map(str::to_string);
                }
                return eval;
            }
        }

        // No score field anywhere: pass only non-empty output that carries
        // no explicit rejection keyword.
        let lowered = output.to_lowercase();
        let rejected = self
            .reject_keywords
            .iter()
            .any(|kw| lowered.contains(kw.as_str()));
        RubricEvaluation {
            rubric_id: rubric.id.clone(),
            score: FALLBACK_SCORE,
            passed: !output.trim().is_empty() && !rejected,
            recommendation: None,
        }
    }

    async fn judge(
        &self,
        rubric: &Rubric,
        agent_id: &str,
        output: &str,
        context: &HashMap<String, serde_json::Value>,
    ) -> Result<RubricEvaluation, RubricError> {
        let agent = self
            .agents
            .resolve(agent_id)
            .await
            .map_err(|e| RubricError::Evaluation(e.to_string()))?;

        let prompt = Self::judge_prompt(rubric, output, context);
        let reply = agent
            .invoke(&prompt, context)
            .await
            .map_err(|e| RubricError::Evaluation(e.to_string()))?;

        Ok(self.score_text(rubric, &reply.text))
    }

    fn judge_prompt(
        rubric: &Rubric,
        output: &str,
        context: &HashMap<String, serde_json::Value>,
    ) -> String {
        let mut criteria = String::new();
        for criterion in &rubric.criteria {
            criteria.push_str(&format!(
                "- {} (weight {}){}\n",
                criterion.name,
                criterion.weight,
                criterion
                    .description
                    .as_deref()
                    .map(|d| format!(": {}", template::resolve(d, context)))
                    .unwrap_or_default()
            ));
        }
        format!(
            "Evaluate the following output against the rubric '{}'.\n\
             Criteria:\n{}\n\
             Reply with a JSON object: {{\"score\": <0-100>, \"recommendation\": \"...\"}}.\n\n\
             Output:\n{}",
            rubric.id, criteria, output
        )
    }
}
