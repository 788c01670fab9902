//! Orphaned-execution recovery.
//!
//! A periodic sweeper claims executions whose lease went stale and hands
//! their latest snapshot back to the execution service for resumption.
//! Disabled entirely when the lease manager is inactive.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::domain::models::snapshot::{CheckpointReason, HensuSnapshot};
use crate::domain::ports::StateRepository;
use crate::services::lease_manager::LeaseManager;

/// Receives recovered executions for resumption.
#[async_trait]
pub trait RecoveryTarget: Send + Sync {
    async fn resume_recovered(&self, snapshot: HensuSnapshot);
}

pub struct RecoverySweeper {
    lease: Arc<LeaseManager>,
    snapshots: Arc<dyn StateRepository>,
    stale_threshold: ChronoDuration,
}

impl RecoverySweeper {
    pub fn new(
        lease: Arc<LeaseManager>,
        snapshots: Arc<dyn StateRepository>,
        stale_threshold: ChronoDuration,
    ) -> Self {
        Self {
            lease,
            snapshots,
            stale_threshold,
        }
    }

    /// One sweep: claim stale rows and requeue each for execution.
    pub async fn sweep(&self, target: &dyn RecoveryTarget) {
        if !self.lease.is_active() {
            return;
        }
        let claimed = match self.lease.claim_stale_executions(self.stale_threshold).await {
            Ok(claimed) => claimed,
            Err(e) => {
                tracing::warn!(error = %e, "Stale-lease claim failed");
                return;
            }
        };
        if claimed.is_empty() {
            return;
        }
        tracing::info!(count = claimed.len(), "Claimed orphaned executions");

        for claim in claimed {
            match self
                .snapshots
                .find_latest(&claim.tenant_id, claim.execution_id)
                .await
            {
                Ok(Some(snapshot)) if snapshot.reason == CheckpointReason::Checkpoint => {
                    tracing::info!(
                        execution_id = %claim.execution_id,
                        tenant = %claim.tenant_id,
                        node = ?snapshot.current_node_id,
                        "Resuming recovered execution"
                    );
                    target.resume_recovered(snapshot).await;
                }
                Ok(Some(snapshot)) => {
                    tracing::debug!(
                        execution_id = %claim.execution_id,
                        reason = %snapshot.reason,
                        "Claimed row is no longer live; skipping"
                    );
                }
                Ok(None) => {
                    tracing::warn!(
                        execution_id = %claim.execution_id,
                        "Claimed execution has no snapshot"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        execution_id = %claim.execution_id,
                        error = %e,
                        "Failed to load claimed snapshot"
                    );
                }
            }
        }
    }

    /// Periodic sweep task. Runs until the token fires.
    pub fn spawn_loop(
        self: Arc<Self>,
        target: Arc<dyn RecoveryTarget>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.sweep(target.as_ref()).await,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryStateRepository;
    use crate::domain::models::state::HensuState;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct Recorder {
        resumed: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl RecoveryTarget for Recorder {
        async fn resume_recovered(&self, snapshot: HensuSnapshot) {
            self.resumed.lock().unwrap().push(snapshot.execution_id);
        }
    }

    #[tokio::test]
    async fn test_sweep_resumes_only_stale_checkpoints() {
        let store = Arc::new(InMemoryStateRepository::new());
        let dead_node = Uuid::new_v4();

        let mut stale = HensuSnapshot::checkpoint(
            "t1",
            Uuid::new_v4(),
            "wf",
            HensuState::new("n", HashMap::new()),
            dead_node,
        );
        stale.last_heartbeat_at = Some(chrono::Utc::now() - ChronoDuration::seconds(600));
        store.save(&stale).await.unwrap();

        let fresh = HensuSnapshot::checkpoint(
            "t1",
            Uuid::new_v4(),
            "wf",
            HensuState::new("n", HashMap::new()),
            dead_node,
        );
        store.save(&fresh).await.unwrap();

        let lease = Arc::new(LeaseManager::new(store.clone(), None));
        let sweeper = RecoverySweeper::new(lease, store, ChronoDuration::seconds(90));
        let recorder = Recorder {
            resumed: Mutex::new(Vec::new()),
        };

        sweeper.sweep(&recorder).await;

        let resumed = recorder.resumed.lock().unwrap();
        assert_eq!(resumed.as_slice(), &[stale.execution_id]);
    }

    #[tokio::test]
    async fn test_inactive_lease_disables_sweeping() {
        let store = Arc::new(InMemoryStateRepository::new());
        let lease = Arc::new(LeaseManager::inactive(store.clone()));
        let sweeper = RecoverySweeper::new(lease, store, ChronoDuration::seconds(90));
        let recorder = Recorder {
            resumed: Mutex::new(Vec::new()),
        };
        sweeper.sweep(&recorder).await;
        assert!(recorder.resumed.lock().unwrap().is_empty());
    }
}
