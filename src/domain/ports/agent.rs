//! Agent port.
//!
//! The engine's single contract with AI model providers. Implementations
//! live outside the core (provider adapters, CLI mocks); they must be
//! `Send + Sync` for concurrent use across tokio tasks and should honour
//! cancellation by returning promptly once their caller is dropped.

use async_trait::async_trait;
use std::collections::HashMap;

/// Errors surfaced by agent invocation. All of these are non-fatal to the
/// engine: they become `Failure` node outcomes.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent unavailable: {0}")]
    Unavailable(String),

    #[error("Invocation timed out after {0}s")]
    Timeout(u64),

    #[error("Invocation failed: {0}")]
    InvocationFailed(String),

    #[error("Invocation cancelled")]
    Cancelled,
}

/// Reply from an agent invocation.
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub text: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AgentReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: HashMap::new(),
        }
    }
}

/// An external component that invokes an AI model.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Invoke the model with a fully resolved prompt and the execution
    /// context. Stateless with respect to the engine.
    async fn invoke(
        &self,
        prompt: &str,
        context: &HashMap<String, serde_json::Value>,
    ) -> Result<AgentReply, AgentError>;
}
