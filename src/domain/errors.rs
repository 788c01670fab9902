//! Domain errors for the Hensu orchestration engine.
//!
//! Only *fatal* conditions are modelled as errors: a missing node, agent,
//! handler, or rubric, an unmatched transition, or a persistence failure.
//! Agent/action/plan failures are materialised as `Failure` node outcomes
//! and never cross the node boundary as `Err`.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur in the Hensu engine.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Handler not found: {0}")]
    HandlerNotFound(String),

    #[error("Rubric not found: {0}")]
    RubricNotFound(String),

    #[error("No valid transition from node {node} for {outcome} outcome")]
    NoValidTransition { node: String, outcome: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
