//! SQLite implementation of the workflow definition repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::adapters::sqlite::timestamp;
use crate::domain::errors::DomainResult;
use crate::domain::models::workflow::Workflow;
use crate::domain::ports::WorkflowRepository;

#[derive(Clone)]
pub struct SqliteWorkflowRepository {
    pool: SqlitePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowRepository for SqliteWorkflowRepository {
    async fn save(&self, tenant_id: &str, workflow: &Workflow) -> DomainResult<()> {
        let definition_json = serde_json::to_string(workflow)?;
        let now = timestamp(chrono::Utc::now());

        sqlx::query(
            "INSERT INTO workflow_definitions (tenant_id, workflow_id, definition_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (tenant_id, workflow_id)
             DO UPDATE SET definition_json = excluded.definition_json, updated_at = excluded.updated_at",
        )
        .bind(tenant_id)
        .bind(&workflow.id)
        .bind(&definition_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, tenant_id: &str, workflow_id: &str) -> DomainResult<Option<Workflow>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT definition_json FROM workflow_definitions WHERE tenant_id = ? AND workflow_id = ?",
        )
        .bind(tenant_id)
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((json,)) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, tenant_id: &str, workflow_id: &str) -> DomainResult<()> {
        sqlx::query("DELETE FROM workflow_definitions WHERE tenant_id = ? AND workflow_id = ?")
            .bind(tenant_id)
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self, tenant_id: &str) -> DomainResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT workflow_id FROM workflow_definitions WHERE tenant_id = ? ORDER BY workflow_id",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
