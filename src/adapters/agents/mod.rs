//! Agent adapters: the runtime registry and in-tree mock agents.

pub mod registry;
pub mod scripted;

pub use registry::AgentRegistry;
pub use scripted::{EchoAgent, ScriptedAgent, ScriptedReply};
