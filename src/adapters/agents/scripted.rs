//! Scripted and echo agents for tests and dry-runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::domain::ports::{Agent, AgentError, AgentReply};

/// One scripted reply.
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    pub text: String,
    pub fail: bool,
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            fail: false,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            text: message.into(),
            fail: true,
        }
    }
}

/// An agent programmed with a reply sequence. Replies are consumed in
/// order; once exhausted, the last reply repeats.
pub struct ScriptedAgent {
    replies: Mutex<VecDeque<ScriptedReply>>,
    last: Mutex<Option<ScriptedReply>>,
    invocations: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(None),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Agent that always answers with the same text.
    pub fn always(text: impl Into<String>) -> Self {
        Self::new(vec![ScriptedReply::text(text)])
    }

    /// Agent that always fails.
    pub fn always_failing(message: impl Into<String>) -> Self {
        Self::new(vec![ScriptedReply::failure(message)])
    }

    /// Prompts this agent has been invoked with, in order.
    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().expect("invocations lock").clone()
    }

    fn next_reply(&self) -> ScriptedReply {
        let mut queue = self.replies.lock().expect("replies lock");
        let mut last = self.last.lock().expect("last lock");
        if let Some(reply) = queue.pop_front() {
            *last = Some(reply.clone());
            reply
        } else {
            last.clone()
                .unwrap_or_else(|| ScriptedReply::failure("scripted agent has no replies"))
        }
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn invoke(
        &self,
        prompt: &str,
        _context: &HashMap<String, serde_json::Value>,
    ) -> Result<AgentReply, AgentError> {
        self.invocations
            .lock()
            .expect("invocations lock")
            .push(prompt.to_string());
        let reply = self.next_reply();
        if reply.fail {
            Err(AgentError::InvocationFailed(reply.text))
        } else {
            Ok(AgentReply::text(reply.text))
        }
    }
}

/// An agent that echoes its prompt back. Used by `hensu run` dry-runs.
pub struct EchoAgent;

#[async_trait]
impl Agent for EchoAgent {
    async fn invoke(
        &self,
        prompt: &str,
        _context: &HashMap<String, serde_json::Value>,
    ) -> Result<AgentReply, AgentError> {
        Ok(AgentReply::text(prompt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_agent_replays_in_order_then_repeats() {
        let agent = ScriptedAgent::new(vec![
            ScriptedReply::failure("first fails"),
            ScriptedReply::text("second works"),
        ]);
        let ctx = HashMap::new();

        assert!(agent.invoke("p1", &ctx).await.is_err());
        assert_eq!(agent.invoke("p2", &ctx).await.unwrap().text, "second works");
        // Exhausted: last reply repeats.
        assert_eq!(agent.invoke("p3", &ctx).await.unwrap().text, "second works");
        assert_eq!(agent.invocations(), vec!["p1", "p2", "p3"]);
    }
}
