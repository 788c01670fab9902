//! Execution snapshot repository port, including the lease operations the
//! distributed-recovery plane relies on.

use async_trait::async_trait;
use chrono::Duration;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::snapshot::HensuSnapshot;

/// Key of an execution claimed from a stale lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedExecution {
    pub tenant_id: String,
    pub execution_id: Uuid,
}

/// Persistence for execution snapshots, one row per
/// `(tenant_id, execution_id)`.
///
/// `save` must be an atomic upsert; per-execution write ordering is the
/// executor's responsibility, so readers observe monotonically
/// non-decreasing checkpoint times. The two lease operations must each be a
/// single atomic statement: heartbeats never touch rows owned by another
/// node, and concurrent claimers never both win the same row.
#[async_trait]
pub trait StateRepository: Send + Sync {
    /// Atomic upsert. Lease columns are written exactly as carried by the
    /// snapshot (set for `checkpoint`, null otherwise).
    async fn save(&self, snapshot: &HensuSnapshot) -> DomainResult<()>;

    /// Latest snapshot for an execution.
    async fn find_latest(
        &self,
        tenant_id: &str,
        execution_id: Uuid,
    ) -> DomainResult<Option<HensuSnapshot>>;

    /// All snapshots for a workflow, ordered by checkpoint time.
    async fn find_by_workflow(
        &self,
        tenant_id: &str,
        workflow_id: &str,
    ) -> DomainResult<Vec<HensuSnapshot>>;

    /// Executions parked for review: reason `paused`, no owner.
    async fn find_paused(&self, tenant_id: &str) -> DomainResult<Vec<HensuSnapshot>>;

    /// Refresh `last_heartbeat_at` on every `checkpoint` row owned by
    /// `server_node_id`. Returns the number of rows touched.
    async fn update_heartbeats(&self, server_node_id: Uuid) -> DomainResult<u64>;

    /// Atomically claim every `checkpoint` row whose heartbeat is older than
    /// `stale_threshold`, reassigning it to `server_node_id`.
    async fn claim_stale(
        &self,
        server_node_id: Uuid,
        stale_threshold: Duration,
    ) -> DomainResult<Vec<ClaimedExecution>>;
}
