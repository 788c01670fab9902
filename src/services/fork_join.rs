//! Fork/join coordination.
//!
//! A fork spawns one detached sub-traversal per target; branch futures are
//! built by the executor (each with a copied context, a child cancellation
//! token, and the execution's event scope) and tracked here per fork id.
//! A join consumes the named forks and merges their branch outcomes under
//! the node's strategy. Branch results never touch the parent state; the
//! merged value is handed back for the executor to write into the context.

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::domain::models::workflow::MergeStrategy;
use crate::services::template;

/// Result of one fork branch's sub-traversal.
#[derive(Debug, Clone)]
pub struct BranchOutcome {
    pub target: String,
    pub success: bool,
    pub output: serde_json::Value,
    pub error: Option<String>,
}

impl BranchOutcome {
    pub fn failed(target: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            target: target.into(),
            success: false,
            output: serde_json::Value::Null,
            error: Some(error),
        }
    }
}

enum ForkState {
    Running(Vec<(String, JoinHandle<BranchOutcome>)>),
    Resolved(Vec<BranchOutcome>),
}

/// One fork's spawned branches, in declared target order.
pub struct ForkHandle {
    pub fork_id: String,
    state: ForkState,
}

impl ForkHandle {
    /// Spawn one task per branch future. Branch futures carry their own
    /// context copy and cancellation token.
    pub fn spawn(
        fork_id: impl Into<String>,
        branches: Vec<(String, BoxFuture<'static, BranchOutcome>)>,
    ) -> Self {
        let handles = branches
            .into_iter()
            .map(|(target, fut)| (target, tokio::spawn(fut)))
            .collect();
        Self {
            fork_id: fork_id.into(),
            state: ForkState::Running(handles),
        }
    }

    /// Await every branch, in declared order. A panicked branch task is
    /// recorded as a failed outcome.
    pub async fn wait_all(&mut self) -> &[BranchOutcome] {
        if let ForkState::Running(handles) = &mut self.state {
            let mut outcomes = Vec::with_capacity(handles.len());
            for (target, handle) in handles.drain(..) {
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => BranchOutcome::failed(&target, format!("branch task failed: {}", e)),
                };
                outcomes.push(outcome);
            }
            self.state = ForkState::Resolved(outcomes);
        }
        match &self.state {
            ForkState::Resolved(outcomes) => outcomes,
            ForkState::Running(_) => unreachable!("fork state resolved above"),
        }
    }
}

/// Merged result of a join node.
#[derive(Debug, Clone)]
pub struct JoinResolution {
    pub success: bool,
    pub value: serde_json::Value,
    pub error: Option<String>,
}

impl JoinResolution {
    fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            value: serde_json::Value::Null,
            error: Some(error),
        }
    }
}

/// Forks spawned so far by one execution. Owned by the executor run; never
/// shared across executions.
#[derive(Default)]
pub struct ForkTable {
    forks: HashMap<String, ForkHandle>,
}

impl ForkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: ForkHandle) {
        self.forks.insert(handle.fork_id.clone(), handle);
    }

    pub fn get_mut(&mut self, fork_id: &str) -> Option<&mut ForkHandle> {
        self.forks.get_mut(fork_id)
    }

    /// Consume the named forks and merge their branches. The whole join is
    /// bounded by `timeout`; on expiry it fails.
    pub async fn join(
        &mut self,
        fork_ids: &[String],
        strategy: MergeStrategy,
        timeout: Duration,
        fail_on_any_error: bool,
    ) -> JoinResolution {
        let mut handles = Vec::with_capacity(fork_ids.len());
        for fork_id in fork_ids {
            match self.forks.remove(fork_id) {
                Some(handle) => handles.push(handle),
                None => {
                    return JoinResolution::failed(format!(
                        "fork '{}' has not run in this execution",
                        fork_id
                    ));
                }
            }
        }

        let resolution = tokio::time::timeout(timeout, async {
            match strategy {
                MergeStrategy::CollectAll | MergeStrategy::Concatenate => {
                    let mut outcomes = Vec::new();
                    for handle in &mut handles {
                        outcomes.extend_from_slice(handle.wait_all().await);
                    }
                    merge_ordered(&outcomes, strategy, fail_on_any_error)
                }
                MergeStrategy::FirstSuccess => first_success(handles, fail_on_any_error).await,
            }
        })
        .await;

        match resolution {
            Ok(resolution) => resolution,
            Err(_) => JoinResolution::failed(format!("join timed out after {}ms", timeout.as_millis())),
        }
    }
}

/// CollectAll / Concatenate merge over branch outcomes in declared order.
fn merge_ordered(
    outcomes: &[BranchOutcome],
    strategy: MergeStrategy,
    fail_on_any_error: bool,
) -> JoinResolution {
    let failures: Vec<&BranchOutcome> = outcomes.iter().filter(|o| !o.success).collect();
    if fail_on_any_error && !failures.is_empty() {
        let detail = failures
            .iter()
            .map(|o| {
                format!(
                    "{}: {}",
                    o.target,
                    o.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        return JoinResolution::failed(format!("branch failure(s): {}", detail));
    }

    let survivors = outcomes.iter().filter(|o| o.success);
    let value = match strategy {
        MergeStrategy::CollectAll => {
            serde_json::Value::Array(survivors.map(|o| o.output.clone()).collect())
        }
        MergeStrategy::Concatenate => serde_json::Value::String(
            survivors
                .map(|o| template::stringify(&o.output))
                .collect::<Vec<_>>()
                .join(""),
        ),
        MergeStrategy::FirstSuccess => unreachable!("handled separately"),
    };

    JoinResolution {
        success: true,
        value,
        error: None,
    }
}

/// FirstSuccess merge: branches are consumed in completion order; the
/// first successful output wins and the rest are left to finish on their
/// own.
async fn first_success(handles: Vec<ForkHandle>, fail_on_any_error: bool) -> JoinResolution {
    let mut race = FuturesUnordered::new();
    let mut failures = Vec::new();
    for handle in handles {
        match handle.state {
            ForkState::Running(branch_handles) => {
                for (target, branch) in branch_handles {
                    race.push(async move {
                        match branch.await {
                            Ok(outcome) => outcome,
                            Err(e) => {
                                BranchOutcome::failed(&target, format!("branch task failed: {}", e))
                            }
                        }
                    });
                }
            }
            // Already resolved by a waitAll fork: scan in place.
            ForkState::Resolved(outcomes) => {
                for outcome in outcomes {
                    if outcome.success {
                        return JoinResolution {
                            success: true,
                            value: outcome.output,
                            error: None,
                        };
                    }
                    failures.push(outcome);
                }
            }
        }
    }
    while let Some(outcome) = race.next().await {
        if outcome.success {
            return JoinResolution {
                success: true,
                value: outcome.output,
                error: None,
            };
        }
        failures.push(outcome);
    }

    if fail_on_any_error && !failures.is_empty() {
        let detail = failures
            .iter()
            .map(|o| {
                format!(
                    "{}: {}",
                    o.target,
                    o.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        JoinResolution::failed(format!("no branch succeeded: {}", detail))
    } else {
        // No surviving branch; the merged value is empty.
        JoinResolution {
            success: true,
            value: serde_json::Value::Null,
            error: None,
        }
    }
}
