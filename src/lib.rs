//! Hensu - workflow orchestration engine for AI agent pipelines
//!
//! A workflow is a directed graph of typed nodes: agent calls, parallel
//! consensus, fork/join, generic handlers, actions, terminators. The engine
//! executes compiled workflow definitions with:
//! - Rubric-gated quality routing and bounded auto-backtracks
//! - Per-node micro-plans (static step lists or planner-generated)
//! - Human review checkpoints with pause/resume
//! - Snapshot persistence after every node (SQLite or in-memory)
//! - Lease-based crash recovery across clustered server nodes
//! - Ordered per-execution event streams

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{HensuSnapshot, HensuState, Workflow};
pub use services::{ExecutionResult, ExecutionService};
