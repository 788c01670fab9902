//! Action dispatch.
//!
//! Routes `send` actions to registered handlers and `execute` actions to the
//! command registry. Handler failures become failed `ActionResult`s, never
//! errors; the only fatal condition is a `send` naming an unregistered
//! handler. `execute` runs the command through a local shell in CLI mode and
//! is always refused in server mode.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::workflow::ActionSpec;
use crate::domain::ports::{ActionHandler, ActionResult, CommandDefinition};
use crate::services::template;

pub struct ActionDispatcher {
    handlers: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
    commands: RwLock<HashMap<String, CommandDefinition>>,
    server_mode: bool,
}

impl ActionDispatcher {
    /// Server-mode dispatcher: `execute` actions are refused.
    pub fn server() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            commands: RwLock::new(HashMap::new()),
            server_mode: true,
        }
    }

    /// Local-mode dispatcher: `execute` actions run through the shell.
    pub fn local() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            commands: RwLock::new(HashMap::new()),
            server_mode: false,
        }
    }

    pub async fn register_handler(&self, handler_id: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.write().await.insert(handler_id.into(), handler);
    }

    pub async fn register_command(&self, command: CommandDefinition) {
        self.commands.write().await.insert(command.id.clone(), command);
    }

    /// Whether a handler is registered under this id.
    pub async fn has_handler(&self, handler_id: &str) -> bool {
        self.handlers.read().await.contains_key(handler_id)
    }

    /// Dispatch one action synchronously.
    pub async fn dispatch(
        &self,
        action: &ActionSpec,
        context: &HashMap<String, serde_json::Value>,
    ) -> DomainResult<ActionResult> {
        match action {
            ActionSpec::Send { handler, payload } => {
                let target = self
                    .handlers
                    .read()
                    .await
                    .get(handler)
                    .cloned()
                    .ok_or_else(|| DomainError::HandlerNotFound(handler.clone()))?;
                let resolved = resolve_payload(payload, context);
                Ok(target.execute(&resolved, context).await)
            }
            ActionSpec::Execute { command } => Ok(self.execute_command(command, context).await),
        }
    }

    async fn execute_command(
        &self,
        command_id: &str,
        context: &HashMap<String, serde_json::Value>,
    ) -> ActionResult {
        if self.server_mode {
            return ActionResult::failure("execute actions are unsupported in server mode");
        }

        let Some(definition) = self.commands.read().await.get(command_id).cloned() else {
            return ActionResult::failure(format!("Unknown command: {}", command_id));
        };

        let shell_line = template::resolve(&definition.command, context);
        tracing::debug!(command = %command_id, line = %shell_line, "Executing local command");

        match tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&shell_line)
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
                ActionResult::ok_with_output(
                    format!("Command '{}' succeeded", command_id),
                    serde_json::Value::String(stdout),
                )
            }
            Ok(output) => ActionResult::failure(format!(
                "Command '{}' exited with {}: {}",
                command_id,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim_end()
            )),
            Err(e) => ActionResult::failure(format!("Command '{}' failed to spawn: {}", command_id, e)),
        }
    }
}

/// Resolve templates inside string payload values.
fn resolve_payload(
    payload: &HashMap<String, serde_json::Value>,
    context: &HashMap<String, serde_json::Value>,
) -> HashMap<String, serde_json::Value> {
    payload
        .iter()
        .map(|(k, v)| {
            let resolved = match v {
                serde_json::Value::String(s) => {
                    serde_json::Value::String(template::resolve(s, context))
                }
                other => other.clone(),
            };
            (k.clone(), resolved)
        })
        .collect()
}
