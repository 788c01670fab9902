//! Action handler port.

use async_trait::async_trait;
use std::collections::HashMap;

/// Outcome of one dispatched action. Handlers never raise; failures are
/// carried in the result.
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    pub output: Option<serde_json::Value>,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            output: None,
        }
    }

    pub fn ok_with_output(message: impl Into<String>, output: serde_json::Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            output: Some(output),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            output: None,
        }
    }
}

/// A registered side-effect target for `send` actions, keyed by handler id.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(
        &self,
        payload: &HashMap<String, serde_json::Value>,
        context: &HashMap<String, serde_json::Value>,
    ) -> ActionResult;
}

/// A named shell command usable by `execute` actions in local mode.
#[derive(Debug, Clone)]
pub struct CommandDefinition {
    pub id: String,
    /// Shell string; `{var}` placeholders resolve from the context.
    pub command: String,
}
