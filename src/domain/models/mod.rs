//! Domain models for the Hensu orchestration engine.

pub mod config;
pub mod plan;
pub mod rubric;
pub mod snapshot;
pub mod state;
pub mod workflow;

pub use config::{Config, DatabaseConfig, EngineConfig, LoggingConfig, SchedulerConfig};
pub use plan::{Plan, PlanStep, StepStatus};
pub use rubric::{Rubric, RubricCriterion, RubricEvaluation, RubricEvaluator};
pub use snapshot::{CheckpointReason, HensuSnapshot};
pub use state::{
    BacktrackEvent, ExecutionStep, HensuState, HistoryEntry, NodeOutcome, NodeResult,
};
pub use workflow::{
    ActionSpec, AgentConfig, Branch, ConsensusSpec, ConsensusStrategy, EndStatus, MergeStrategy,
    Node, PlanConstraints, PlanSpec, PlanStepSpec, ReviewConfig, ReviewMode, ScoreCondition,
    ScoreOp, Transition, Workflow,
};
