//! SQLite implementation of the execution snapshot repository.
//!
//! One row per `(tenant_id, execution_id)`; `save` is a single upsert, and
//! the two lease operations are each one UPDATE statement, so concurrent
//! heartbeats and claims serialise inside SQLite without read-modify-write
//! races.

use async_trait::async_trait;
use chrono::Duration;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::sqlite::{parse_datetime, parse_optional_datetime, parse_uuid, timestamp};
use crate::domain::errors::DomainResult;
use crate::domain::models::snapshot::{CheckpointReason, HensuSnapshot};
use crate::domain::ports::{ClaimedExecution, StateRepository};

#[derive(Clone)]
pub struct SqliteStateRepository {
    pool: SqlitePool,
}

impl SqliteStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateRepository for SqliteStateRepository {
    async fn save(&self, snapshot: &HensuSnapshot) -> DomainResult<()> {
        let state_json = serde_json::to_string(&snapshot.state)?;

        sqlx::query(
            "INSERT INTO execution_snapshots
                (tenant_id, execution_id, workflow_id, state_json, current_node_id,
                 checkpoint_reason, checkpoint_time, server_node_id, last_heartbeat_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (tenant_id, execution_id)
             DO UPDATE SET
                workflow_id = excluded.workflow_id,
                state_json = excluded.state_json,
                current_node_id = excluded.current_node_id,
                checkpoint_reason = excluded.checkpoint_reason,
                checkpoint_time = excluded.checkpoint_time,
                server_node_id = excluded.server_node_id,
                last_heartbeat_at = excluded.last_heartbeat_at",
        )
        .bind(&snapshot.tenant_id)
        .bind(snapshot.execution_id.to_string())
        .bind(&snapshot.workflow_id)
        .bind(&state_json)
        .bind(&snapshot.current_node_id)
        .bind(snapshot.reason.as_str())
        .bind(timestamp(snapshot.checkpoint_time))
        .bind(snapshot.server_node_id.map(|id| id.to_string()))
        .bind(snapshot.last_heartbeat_at.map(timestamp))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_latest(
        &self,
        tenant_id: &str,
        execution_id: Uuid,
    ) -> DomainResult<Option<HensuSnapshot>> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            "SELECT tenant_id, execution_id, workflow_id, state_json, current_node_id,
                    checkpoint_reason, checkpoint_time, server_node_id, last_heartbeat_at
             FROM execution_snapshots
             WHERE tenant_id = ? AND execution_id = ?",
        )
        .bind(tenant_id)
        .bind(execution_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SnapshotRow::try_into_snapshot).transpose()
    }

    async fn find_by_workflow(
        &self,
        tenant_id: &str,
        workflow_id: &str,
    ) -> DomainResult<Vec<HensuSnapshot>> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(
            "SELECT tenant_id, execution_id, workflow_id, state_json, current_node_id,
                    checkpoint_reason, checkpoint_time, server_node_id, last_heartbeat_at
             FROM execution_snapshots
             WHERE tenant_id = ? AND workflow_id = ?
             ORDER BY checkpoint_time",
        )
        .bind(tenant_id)
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SnapshotRow::try_into_snapshot).collect()
    }

    async fn find_paused(&self, tenant_id: &str) -> DomainResult<Vec<HensuSnapshot>> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(
            "SELECT tenant_id, execution_id, workflow_id, state_json, current_node_id,
                    checkpoint_reason, checkpoint_time, server_node_id, last_heartbeat_at
             FROM execution_snapshots
             WHERE tenant_id = ? AND checkpoint_reason = 'paused' AND server_node_id IS NULL
             ORDER BY checkpoint_time",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SnapshotRow::try_into_snapshot).collect()
    }

    async fn update_heartbeats(&self, server_node_id: Uuid) -> DomainResult<u64> {
        let result = sqlx::query(
            "UPDATE execution_snapshots
             SET last_heartbeat_at = ?
             WHERE server_node_id = ? AND checkpoint_reason = 'checkpoint'",
        )
        .bind(timestamp(chrono::Utc::now()))
        .bind(server_node_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn claim_stale(
        &self,
        server_node_id: Uuid,
        stale_threshold: Duration,
    ) -> DomainResult<Vec<ClaimedExecution>> {
        let now = chrono::Utc::now();
        let cutoff = timestamp(now - stale_threshold);

        let rows: Vec<(String, String)> = sqlx::query_as(
            "UPDATE execution_snapshots
             SET server_node_id = ?, last_heartbeat_at = ?
             WHERE checkpoint_reason = 'checkpoint'
               AND last_heartbeat_at IS NOT NULL
               AND last_heartbeat_at < ?
             RETURNING tenant_id, execution_id",
        )
        .bind(server_node_id.to_string())
        .bind(timestamp(now))
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(tenant_id, execution_id)| {
                Ok(ClaimedExecution {
                    tenant_id,
                    execution_id: parse_uuid(&execution_id)?,
                })
            })
            .collect()
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    tenant_id: String,
    execution_id: String,
    workflow_id: String,
    state_json: String,
    current_node_id: Option<String>,
    checkpoint_reason: String,
    checkpoint_time: String,
    server_node_id: Option<String>,
    last_heartbeat_at: Option<String>,
}

impl SnapshotRow {
    fn try_into_snapshot(self) -> DomainResult<HensuSnapshot> {
        let reason = CheckpointReason::parse(&self.checkpoint_reason)?;
        let server_node_id = self.server_node_id.map(|s| parse_uuid(&s)).transpose()?;

        Ok(HensuSnapshot {
            tenant_id: self.tenant_id,
            execution_id: parse_uuid(&self.execution_id)?,
            workflow_id: self.workflow_id,
            state: serde_json::from_str(&self.state_json)?,
            current_node_id: self.current_node_id,
            reason,
            checkpoint_time: parse_datetime(&self.checkpoint_time)?,
            server_node_id,
            last_heartbeat_at: parse_optional_datetime(self.last_heartbeat_at)?,
        })
    }
}
