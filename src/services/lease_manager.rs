//! Execution lease management.
//!
//! Each process owns a `server_node_id` and keeps heartbeats fresh on every
//! checkpoint row it owns. Stale rows (their owner stopped heartbeating)
//! are claimed atomically by whichever sweeper gets there first; the store
//! guarantees a row is never claimed twice. Inactive mode (in-memory
//! deployments) turns both operations into no-ops.

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::ports::{ClaimedExecution, StateRepository};

pub struct LeaseManager {
    server_node_id: Uuid,
    store: Arc<dyn StateRepository>,
    active: bool,
}

impl LeaseManager {
    /// Active lease manager. `server_node_id` may be overridden by
    /// configuration; a fresh UUID is generated otherwise.
    pub fn new(store: Arc<dyn StateRepository>, server_node_id: Option<Uuid>) -> Self {
        Self {
            server_node_id: server_node_id.unwrap_or_else(Uuid::new_v4),
            store,
            active: true,
        }
    }

    /// Inactive lease manager for in-memory deployments: heartbeats and
    /// claims are no-ops.
    pub fn inactive(store: Arc<dyn StateRepository>) -> Self {
        Self {
            server_node_id: Uuid::new_v4(),
            store,
            active: false,
        }
    }

    pub fn server_node_id(&self) -> Uuid {
        self.server_node_id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Refresh heartbeats on every row this node owns. Never touches rows
    /// owned by other nodes.
    pub async fn update_heartbeats(&self) -> DomainResult<u64> {
        if !self.active {
            return Ok(0);
        }
        self.store.update_heartbeats(self.server_node_id).await
    }

    /// Claim every execution whose lease expired, reassigning it to this
    /// node in one atomic operation.
    pub async fn claim_stale_executions(
        &self,
        stale_threshold: ChronoDuration,
    ) -> DomainResult<Vec<ClaimedExecution>> {
        if !self.active {
            return Ok(Vec::new());
        }
        self.store
            .claim_stale(self.server_node_id, stale_threshold)
            .await
    }

    /// Periodic heartbeat task. Runs until the token fires.
    pub fn spawn_heartbeat_loop(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match manager.update_heartbeats().await {
                            Ok(0) => {}
                            Ok(count) => {
                                tracing::debug!(
                                    server_node_id = %manager.server_node_id,
                                    rows = count,
                                    "Heartbeats refreshed"
                                );
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Heartbeat update failed");
                            }
                        }
                    }
                }
            }
        })
    }
}
