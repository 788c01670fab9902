//! Runtime plan model.
//!
//! A `Plan` is the materialised step sequence executed inside one node:
//! either the node's declared static steps, or the step list a planner
//! produced for a dynamic goal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Result status of a single executed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepStatus {
    Pending,
    Success,
    Failure,
    Skipped,
}

/// One step of a materialised plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub index: usize,
    pub tool: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub args: HashMap<String, serde_json::Value>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlanStep {
    pub fn new(index: usize, tool: impl Into<String>, args: HashMap<String, serde_json::Value>) -> Self {
        Self {
            index,
            tool: tool.into(),
            args,
            status: StepStatus::Pending,
            output: None,
            error: None,
        }
    }
}

/// A materialised plan for one node execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: Uuid,
    pub node_id: String,
    /// Goal text, dynamic plans only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    pub steps: Vec<PlanStep>,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(node_id: impl Into<String>, goal: Option<String>, steps: Vec<PlanStep>) -> Self {
        Self {
            id: Uuid::new_v4(),
            node_id: node_id.into(),
            goal,
            steps,
            created_at: Utc::now(),
        }
    }

    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Success)
            .count()
    }
}
