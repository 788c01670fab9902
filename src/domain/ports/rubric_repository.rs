//! Rubric repository port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::rubric::Rubric;

/// Lookup for shared rubrics. Workflow-local rubric mappings take
/// precedence; this repository is the fallback.
#[async_trait]
pub trait RubricRepository: Send + Sync {
    async fn find(&self, rubric_id: &str) -> DomainResult<Option<Rubric>>;
}
