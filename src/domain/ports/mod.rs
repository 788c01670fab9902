//! Domain ports (interfaces) consumed by the Hensu engine.

pub mod action_handler;
pub mod agent;
pub mod generic_handler;
pub mod planner;
pub mod reviewer;
pub mod rubric_repository;
pub mod state_repository;
pub mod workflow_repository;

pub use action_handler::{ActionHandler, ActionResult, CommandDefinition};
pub use agent::{Agent, AgentError, AgentReply};
pub use generic_handler::GenericHandler;
pub use planner::{Planner, PlannerError};
pub use reviewer::{ReviewDecision, ReviewError, Reviewer};
pub use rubric_repository::RubricRepository;
pub use state_repository::{ClaimedExecution, StateRepository};
pub use workflow_repository::WorkflowRepository;
