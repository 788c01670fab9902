//! Generic node handler port.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::domain::models::state::NodeResult;

/// Handler invoked for Generic nodes, keyed by `executorType`. Internal
/// failures should be reported as a `Failure` result; a missing handler is
/// the only fatal condition, and that is raised by the dispatcher.
#[async_trait]
pub trait GenericHandler: Send + Sync {
    async fn handle(
        &self,
        config: &HashMap<String, serde_json::Value>,
        context: &HashMap<String, serde_json::Value>,
    ) -> NodeResult;
}
