//! Mutable execution state.
//!
//! A `HensuState` is owned exclusively by the task currently advancing its
//! execution; it crosses component boundaries only inside snapshots. History
//! is append-only: retries append further steps, backtracks append a
//! `BacktrackEvent`, nothing is ever rewritten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::models::rubric::RubricEvaluation;

/// Outcome of a single node execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeOutcome {
    Success,
    Failure,
}

impl std::fmt::Display for NodeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// Result returned by the node dispatcher for one node execution.
#[derive(Debug, Clone)]
pub struct NodeResult {
    pub outcome: NodeOutcome,
    pub output: serde_json::Value,
    pub metadata: HashMap<String, serde_json::Value>,
    pub rubric: Option<RubricEvaluation>,
}

impl NodeResult {
    pub fn success(output: impl Into<serde_json::Value>) -> Self {
        Self {
            outcome: NodeOutcome::Success,
            output: output.into(),
            metadata: HashMap::new(),
            rubric: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            outcome: NodeOutcome::Failure,
            output: serde_json::Value::String(message.into()),
            metadata: HashMap::new(),
            rubric: None,
        }
    }

    pub fn with_rubric(mut self, rubric: RubricEvaluation) -> Self {
        self.rubric = Some(rubric);
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == NodeOutcome::Success
    }
}

/// One completed node execution, recorded in history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    pub node_id: String,
    pub outcome: NodeOutcome,
    pub output: serde_json::Value,
    pub at: DateTime<Utc>,
}

/// A current-node reassignment, recorded in history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktrackEvent {
    pub from: String,
    pub to: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// A history entry: a node execution or a backtrack.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HistoryEntry {
    Step(ExecutionStep),
    Backtrack(BacktrackEvent),
}

/// Per-execution mutable snapshot of workflow progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HensuState {
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Null once the execution is terminal.
    pub current_node_id: Option<String>,
    #[serde(default)]
    pub retry_counts: HashMap<String, u32>,
    #[serde(default)]
    pub backtrack_counts: HashMap<String, u32>,
    /// Evaluation of the node most recently executed. Cleared whenever the
    /// current node advances; carrying it further would let a downstream
    /// score transition match a stale score.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rubric: Option<RubricEvaluation>,
}

impl HensuState {
    /// Fresh state positioned at the workflow's start node.
    pub fn new(start_node: impl Into<String>, context: HashMap<String, serde_json::Value>) -> Self {
        Self {
            context,
            history: Vec::new(),
            current_node_id: Some(start_node.into()),
            retry_counts: HashMap::new(),
            backtrack_counts: HashMap::new(),
            last_rubric: None,
        }
    }

    /// Append a completed node execution.
    pub fn record_step(&mut self, node_id: &str, result: &NodeResult) {
        self.history.push(HistoryEntry::Step(ExecutionStep {
            node_id: node_id.to_string(),
            outcome: result.outcome,
            output: result.output.clone(),
            at: Utc::now(),
        }));
    }

    /// Append a backtrack entry without touching counters or the current
    /// node. Rubric-driven self-backtracks use this directly.
    pub fn record_backtrack_event(&mut self, from: &str, to: &str, reason: &str) {
        self.history.push(HistoryEntry::Backtrack(BacktrackEvent {
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.to_string(),
            at: Utc::now(),
        }));
    }

    /// Append a backtrack and move the current node. The target's backtrack
    /// counter resets; the source's retry counter is left alone so a
    /// retry/backtrack ping-pong cannot loop forever.
    pub fn record_backtrack(&mut self, from: &str, to: &str, reason: &str) {
        self.record_backtrack_event(from, to, reason);
        self.backtrack_counts.remove(to);
        self.current_node_id = Some(to.to_string());
    }

    pub fn retry_count(&self, node_id: &str) -> u32 {
        self.retry_counts.get(node_id).copied().unwrap_or(0)
    }

    pub fn increment_retry(&mut self, node_id: &str) -> u32 {
        let count = self.retry_counts.entry(node_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn backtrack_count(&self, node_id: &str) -> u32 {
        self.backtrack_counts.get(node_id).copied().unwrap_or(0)
    }

    pub fn increment_backtrack(&mut self, node_id: &str) -> u32 {
        let count = self.backtrack_counts.entry(node_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Number of executed steps (backtracks excluded).
    pub fn step_count(&self) -> usize {
        self.history
            .iter()
            .filter(|e| matches!(e, HistoryEntry::Step(_)))
            .count()
    }

    /// Externally visible output: every context key not prefixed with `_`.
    pub fn output(&self) -> HashMap<String, serde_json::Value> {
        self.context
            .iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_append_only_across_backtrack() {
        let mut state = HensuState::new("a", HashMap::new());
        state.record_step("a", &NodeResult::success("one"));
        state.record_step("b", &NodeResult::success("two"));
        state.record_backtrack("b", "a", "rework");

        assert_eq!(state.history.len(), 3);
        assert!(matches!(state.history[0], HistoryEntry::Step(_)));
        assert!(matches!(state.history[2], HistoryEntry::Backtrack(_)));
        assert_eq!(state.current_node_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_backtrack_resets_target_counter_only() {
        let mut state = HensuState::new("a", HashMap::new());
        state.increment_retry("b");
        state.increment_backtrack("a");
        state.increment_backtrack("a");

        state.record_backtrack("b", "a", "reviewer said so");

        assert_eq!(state.backtrack_count("a"), 0);
        assert_eq!(state.retry_count("b"), 1);
    }

    #[test]
    fn test_output_filters_underscore_keys() {
        let mut state = HensuState::new("a", HashMap::new());
        state
            .context
            .insert("result".to_string(), serde_json::json!("ok"));
        state
            .context
            .insert("_pending_review".to_string(), serde_json::json!("a"));

        let output = state.output();
        assert!(output.contains_key("result"));
        assert!(!output.contains_key("_pending_review"));
    }

    #[test]
    fn test_state_json_round_trip_preserves_equality() {
        let mut state = HensuState::new("start", HashMap::new());
        state.record_step("start", &NodeResult::failure("boom"));
        state.increment_retry("start");

        let json = serde_json::to_value(&state).unwrap();
        let back: HensuState = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(json, serde_json::to_value(&back).unwrap());
    }
}
