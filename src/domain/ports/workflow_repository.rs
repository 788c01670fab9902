//! Workflow definition repository port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::workflow::Workflow;

/// Persistence for workflow definitions, keyed by `(tenant_id, workflow_id)`.
/// Definitions only; execution state lives in the state repository.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Save (upsert) a workflow definition.
    async fn save(&self, tenant_id: &str, workflow: &Workflow) -> DomainResult<()>;

    /// Fetch a workflow definition.
    async fn find(&self, tenant_id: &str, workflow_id: &str) -> DomainResult<Option<Workflow>>;

    /// Delete a workflow definition.
    async fn delete(&self, tenant_id: &str, workflow_id: &str) -> DomainResult<()>;

    /// List workflow ids for a tenant.
    async fn list(&self, tenant_id: &str) -> DomainResult<Vec<String>>;
}
