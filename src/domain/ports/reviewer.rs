//! Reviewer port.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::domain::models::state::{HensuState, NodeResult};

/// Decision returned by an external reviewer.
#[derive(Debug, Clone)]
pub enum ReviewDecision {
    Approve,
    Reject {
        reason: String,
    },
    /// Reset the current node to `target` and resume forward execution.
    Backtrack {
        target: String,
        state_override: Option<HashMap<String, serde_json::Value>>,
        reason: String,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("Review handler failed: {0}")]
pub struct ReviewError(pub String);

/// An external decision-maker consulted at review checkpoints. May block
/// for a long time; must honour cancellation.
#[async_trait]
pub trait Reviewer: Send + Sync {
    async fn request(
        &self,
        node_id: &str,
        state: &HensuState,
        result: &NodeResult,
    ) -> Result<ReviewDecision, ReviewError>;
}
