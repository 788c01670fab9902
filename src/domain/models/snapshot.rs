//! Persisted execution snapshots and their lease fields.
//!
//! Lease coherence is enforced at construction: a `checkpoint` snapshot
//! always carries the owning server node and a heartbeat timestamp; paused
//! and terminal snapshots always carry neither.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::state::HensuState;

/// Why a snapshot was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckpointReason {
    /// Execution is live and owned by a server node.
    Checkpoint,
    /// Execution is parked awaiting a human decision.
    Paused,
    Completed,
    Failed,
    Rejected,
    Cancelled,
}

impl CheckpointReason {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Rejected | Self::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Checkpoint => "checkpoint",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "checkpoint" => Ok(Self::Checkpoint),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "rejected" => Ok(Self::Rejected),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(DomainError::SerializationError(format!(
                "Unknown checkpoint reason: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for CheckpointReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted execution snapshot keyed by `(tenant_id, execution_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HensuSnapshot {
    pub tenant_id: String,
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub state: HensuState,
    /// Null iff the reason is terminal.
    pub current_node_id: Option<String>,
    pub reason: CheckpointReason,
    pub checkpoint_time: DateTime<Utc>,
    /// Owning server node. Set iff reason is `checkpoint`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_node_id: Option<Uuid>,
    /// Last heartbeat on this row. Set iff reason is `checkpoint`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

impl HensuSnapshot {
    /// A live mid-execution snapshot owned by `server_node_id`.
    pub fn checkpoint(
        tenant_id: impl Into<String>,
        execution_id: Uuid,
        workflow_id: impl Into<String>,
        state: HensuState,
        server_node_id: Uuid,
    ) -> Self {
        let current_node_id = state.current_node_id.clone();
        Self {
            tenant_id: tenant_id.into(),
            execution_id,
            workflow_id: workflow_id.into(),
            state,
            current_node_id,
            reason: CheckpointReason::Checkpoint,
            checkpoint_time: Utc::now(),
            server_node_id: Some(server_node_id),
            last_heartbeat_at: Some(Utc::now()),
        }
    }

    /// A snapshot parked for human review. Lease fields cleared so any node
    /// may pick the execution up on resume.
    pub fn paused(
        tenant_id: impl Into<String>,
        execution_id: Uuid,
        workflow_id: impl Into<String>,
        state: HensuState,
    ) -> Self {
        let current_node_id = state.current_node_id.clone();
        Self {
            tenant_id: tenant_id.into(),
            execution_id,
            workflow_id: workflow_id.into(),
            state,
            current_node_id,
            reason: CheckpointReason::Paused,
            checkpoint_time: Utc::now(),
            server_node_id: None,
            last_heartbeat_at: None,
        }
    }

    /// A terminal snapshot. Clears the current node and the lease fields.
    pub fn terminal(
        tenant_id: impl Into<String>,
        execution_id: Uuid,
        workflow_id: impl Into<String>,
        mut state: HensuState,
        reason: CheckpointReason,
    ) -> Self {
        debug_assert!(reason.is_terminal());
        state.current_node_id = None;
        Self {
            tenant_id: tenant_id.into(),
            execution_id,
            workflow_id: workflow_id.into(),
            state,
            current_node_id: None,
            reason,
            checkpoint_time: Utc::now(),
            server_node_id: None,
            last_heartbeat_at: None,
        }
    }

    /// Lease-field coherence per the snapshot's reason.
    pub fn lease_is_coherent(&self) -> bool {
        match self.reason {
            CheckpointReason::Checkpoint => {
                self.server_node_id.is_some() && self.last_heartbeat_at.is_some()
            }
            _ => self.server_node_id.is_none() && self.last_heartbeat_at.is_none(),
        }
    }
}
