//! Planner port, used only by dynamic planning.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::domain::models::workflow::{PlanConstraints, PlanStepSpec};

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("No planner is configured")]
    NotConfigured,

    #[error("Planning failed: {0}")]
    PlanningFailed(String),
}

/// Produces an ordered step list for a goal, within the given constraints.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        goal: &str,
        constraints: &PlanConstraints,
        tools: &[String],
        context: &HashMap<String, serde_json::Value>,
    ) -> Result<Vec<PlanStepSpec>, PlannerError>;
}
