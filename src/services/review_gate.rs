//! Human review checkpoints.
//!
//! Disabled nodes auto-approve. Optional nodes consult the reviewer only on
//! failure; required nodes always do. With no reviewer registered (the
//! server deployment) the gate reports `Pending` and the executor parks the
//! execution for `resumeExecution` to answer. A reviewer error is treated
//! as a rejection carrying the error as its reason.

use std::sync::Arc;

use crate::domain::models::state::{HensuState, NodeResult};
use crate::domain::models::workflow::{ReviewConfig, ReviewMode};
use crate::domain::ports::{ReviewDecision, Reviewer};

/// Outcome of the gate for one node execution.
#[derive(Debug, Clone)]
pub enum GateOutcome {
    Approved,
    Rejected {
        reason: String,
    },
    Backtrack {
        target: String,
        state_override: Option<std::collections::HashMap<String, serde_json::Value>>,
        reason: String,
    },
    /// A decision is needed but nobody can make one right now.
    Pending,
}

pub struct ReviewGate {
    reviewer: Option<Arc<dyn Reviewer>>,
}

impl ReviewGate {
    pub fn new(reviewer: Option<Arc<dyn Reviewer>>) -> Self {
        Self { reviewer }
    }

    /// Whether this node execution needs a review decision at all.
    pub fn review_needed(config: ReviewConfig, result: &NodeResult) -> bool {
        match config.mode {
            ReviewMode::Disabled => false,
            ReviewMode::Optional => !result.is_success(),
            ReviewMode::Required => true,
        }
    }

    /// Obtain a decision: an explicit override wins, then the registered
    /// reviewer, else the gate is pending.
    pub async fn decide(
        &self,
        node_id: &str,
        state: &HensuState,
        result: &NodeResult,
        override_decision: Option<ReviewDecision>,
    ) -> GateOutcome {
        if let Some(decision) = override_decision {
            return Self::from_decision(decision);
        }

        match &self.reviewer {
            None => GateOutcome::Pending,
            Some(reviewer) => match reviewer.request(node_id, state, result).await {
                Ok(decision) => Self::from_decision(decision),
                Err(e) => GateOutcome::Rejected {
                    reason: e.to_string(),
                },
            },
        }
    }

    fn from_decision(decision: ReviewDecision) -> GateOutcome {
        match decision {
            ReviewDecision::Approve => GateOutcome::Approved,
            ReviewDecision::Reject { reason } => GateOutcome::Rejected { reason },
            ReviewDecision::Backtrack {
                target,
                state_override,
                reason,
            } => GateOutcome::Backtrack {
                target,
                state_override,
                reason,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    use crate::domain::ports::ReviewError;

    struct FixedReviewer(ReviewDecision);

    #[async_trait]
    impl Reviewer for FixedReviewer {
        async fn request(
            &self,
            _node_id: &str,
            _state: &HensuState,
            _result: &NodeResult,
        ) -> Result<ReviewDecision, ReviewError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenReviewer;

    #[async_trait]
    impl Reviewer for BrokenReviewer {
        async fn request(
            &self,
            _node_id: &str,
            _state: &HensuState,
            _result: &NodeResult,
        ) -> Result<ReviewDecision, ReviewError> {
            Err(ReviewError("reviewer crashed".to_string()))
        }
    }

    fn config(mode: ReviewMode) -> ReviewConfig {
        ReviewConfig { mode }
    }

    #[test]
    fn test_review_needed_per_mode() {
        let ok = NodeResult::success("fine");
        let bad = NodeResult::failure("broken");

        assert!(!ReviewGate::review_needed(config(ReviewMode::Disabled), &ok));
        assert!(!ReviewGate::review_needed(config(ReviewMode::Disabled), &bad));
        assert!(!ReviewGate::review_needed(config(ReviewMode::Optional), &ok));
        assert!(ReviewGate::review_needed(config(ReviewMode::Optional), &bad));
        assert!(ReviewGate::review_needed(config(ReviewMode::Required), &ok));
        assert!(ReviewGate::review_needed(config(ReviewMode::Required), &bad));
    }

    #[tokio::test]
    async fn test_no_reviewer_is_pending() {
        let gate = ReviewGate::new(None);
        let state = HensuState::new("n", HashMap::new());
        let outcome = gate
            .decide("n", &state, &NodeResult::success("x"), None)
            .await;
        assert!(matches!(outcome, GateOutcome::Pending));
    }

    #[tokio::test]
    async fn test_override_wins_over_reviewer() {
        let gate = ReviewGate::new(Some(Arc::new(FixedReviewer(ReviewDecision::Approve))));
        let state = HensuState::new("n", HashMap::new());
        let outcome = gate
            .decide(
                "n",
                &state,
                &NodeResult::success("x"),
                Some(ReviewDecision::Reject {
                    reason: "operator said no".to_string(),
                }),
            )
            .await;
        assert!(matches!(outcome, GateOutcome::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_reviewer_error_becomes_rejection() {
        let gate = ReviewGate::new(Some(Arc::new(BrokenReviewer)));
        let state = HensuState::new("n", HashMap::new());
        let outcome = gate
            .decide("n", &state, &NodeResult::success("x"), None)
            .await;
        match outcome {
            GateOutcome::Rejected { reason } => assert!(reason.contains("crashed")),
            other => panic!("expected rejection, got {:?}", other),
        }
    }
}
