//! Execution engine services.

pub mod action_dispatcher;
pub mod consensus;
pub mod event_broadcaster;
pub mod execution_service;
pub mod executor;
pub mod extractor;
pub mod fork_join;
pub mod lease_manager;
pub mod node_executor;
pub mod plan_engine;
pub mod recovery;
pub mod review_gate;
pub mod rubric_engine;
pub mod template;

pub use action_dispatcher::ActionDispatcher;
pub use consensus::{BranchRun, BranchVote, ConsensusEvaluator, ConsensusOutcome, Vote};
pub use event_broadcaster::{run_as, EventBroadcaster, EventPayload, ExecutionEvent};
pub use execution_service::{ExecutionService, ExecutionStatus, ExecutionStatusView};
pub use executor::{select_transition, ExecutionResult, RunOutcome, Selection, WorkflowExecutor};
pub use fork_join::{BranchOutcome, ForkHandle, ForkTable, JoinResolution};
pub use lease_manager::LeaseManager;
pub use node_executor::{BranchSpawner, NodeExecution, NodeExecutor};
pub use plan_engine::{PlanEngine, PlanRun};
pub use recovery::{RecoverySweeper, RecoveryTarget};
pub use review_gate::{GateOutcome, ReviewGate};
pub use rubric_engine::{RubricEngine, RubricError};
