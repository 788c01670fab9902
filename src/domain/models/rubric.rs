//! Rubric domain model.
//!
//! A rubric is a named scoring policy: a pass threshold, ordered criteria,
//! and an evaluation mode (self-scored output or a designated judge agent).

use serde::{Deserialize, Serialize};

/// How a rubric is evaluated against node output.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RubricEvaluator {
    /// Parse a score out of the node's own output.
    #[default]
    SelfScore,
    /// Ask a judge agent to score the output.
    Judge { agent_id: String },
}

/// One weighted criterion within a rubric.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricCriterion {
    pub name: String,
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A named scoring policy with a pass threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rubric {
    pub id: String,
    pub pass_threshold: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub criteria: Vec<RubricCriterion>,
    #[serde(default, skip_serializing_if = "is_self_score")]
    pub evaluator: RubricEvaluator,
}

fn is_self_score(e: &RubricEvaluator) -> bool {
    *e == RubricEvaluator::SelfScore
}

/// Result of evaluating a rubric against a node's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricEvaluation {
    pub rubric_id: String,
    /// Clamped to [0, 100].
    pub score: f64,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl RubricEvaluation {
    pub fn new(rubric_id: impl Into<String>, score: f64, pass_threshold: f64) -> Self {
        let score = score.clamp(0.0, 100.0);
        Self {
            rubric_id: rubric_id.into(),
            score,
            passed: score >= pass_threshold,
            recommendation: None,
        }
    }
}
