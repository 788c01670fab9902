//! Per-execution event streaming.
//!
//! Events are published into per-execution broadcast channels and delivered
//! to subscribers in publish order. The execution id is carried by a tokio
//! task-local bound with [`run_as`]; code deep in the engine (including
//! branch tasks, which are re-wrapped by the fork coordinator) publishes
//! without threading the id through every call. Asynchronous planner tasks
//! route through an explicit plan registration table instead, which takes
//! precedence over the scoped value.
//!
//! Slow subscribers are tolerated: each receiver has a bounded buffer and
//! loses oldest events on overflow; the publisher never blocks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::models::state::NodeOutcome;

tokio::task_local! {
    static CURRENT_EXECUTION: Uuid;
}

/// Bind `execution_id` as the current execution for the whole future.
pub async fn run_as<F>(execution_id: Uuid, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_EXECUTION.scope(execution_id, fut).await
}

/// The execution id bound to the current task, if any.
pub fn current_execution() -> Option<Uuid> {
    CURRENT_EXECUTION.try_with(|id| *id).ok()
}

/// Payload of an execution event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EventPayload {
    ExecutionStarted {
        workflow_id: String,
        tenant_id: String,
    },
    NodeStarted {
        node_id: String,
    },
    NodeCompleted {
        node_id: String,
        outcome: NodeOutcome,
    },
    PlanCreated {
        plan_id: Uuid,
        node_id: String,
        step_count: usize,
    },
    PlanStepStarted {
        plan_id: Uuid,
        step_index: usize,
        tool: String,
    },
    PlanStepCompleted {
        plan_id: Uuid,
        step_index: usize,
        success: bool,
    },
    PlanCompleted {
        plan_id: Uuid,
        success: bool,
    },
    ReviewRequested {
        node_id: String,
    },
    ReviewDecided {
        node_id: String,
        decision: String,
    },
    Backtrack {
        from: String,
        to: String,
        reason: String,
    },
    ExecutionCompleted {
        success: bool,
        final_node_id: Option<String>,
        output: HashMap<String, serde_json::Value>,
    },
}

impl EventPayload {
    /// Dotted kind string for subscribers that filter by kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ExecutionStarted { .. } => "execution.started",
            Self::NodeStarted { .. } => "node.started",
            Self::NodeCompleted { .. } => "node.completed",
            Self::PlanCreated { .. } => "plan.created",
            Self::PlanStepStarted { .. } => "plan.step.started",
            Self::PlanStepCompleted { .. } => "plan.step.completed",
            Self::PlanCompleted { .. } => "plan.completed",
            Self::ReviewRequested { .. } => "review.requested",
            Self::ReviewDecided { .. } => "review.decided",
            Self::Backtrack { .. } => "backtrack",
            Self::ExecutionCompleted { .. } => "execution.completed",
        }
    }
}

/// An event on one execution's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEvent {
    pub execution_id: Uuid,
    /// Position within this execution's stream, starting at 0.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

struct Channel {
    sender: broadcast::Sender<ExecutionEvent>,
    sequence: Arc<AtomicU64>,
}

/// Fan-out hub for execution events.
pub struct EventBroadcaster {
    channels: RwLock<HashMap<Uuid, Channel>>,
    plan_routes: RwLock<HashMap<Uuid, Uuid>>,
    capacity: usize,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            plan_routes: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Subscribe to an execution's stream.
    pub fn subscribe(&self, execution_id: Uuid) -> broadcast::Receiver<ExecutionEvent> {
        let mut channels = self.channels.write().expect("channel map lock");
        let channel = channels.entry(execution_id).or_insert_with(|| Channel {
            sender: broadcast::channel(self.capacity).0,
            sequence: Arc::new(AtomicU64::new(0)),
        });
        channel.sender.subscribe()
    }

    /// Publish into the stream of the task-scoped execution. Events
    /// published outside any scope are dropped with a warning.
    pub fn publish(&self, payload: EventPayload) {
        match current_execution() {
            Some(execution_id) => self.publish_to(execution_id, payload),
            None => {
                tracing::warn!(kind = payload.kind(), "Event published outside an execution scope");
            }
        }
    }

    /// Publish into a specific execution's stream.
    pub fn publish_to(&self, execution_id: Uuid, payload: EventPayload) {
        let terminal = matches!(payload.kind(), "execution.completed");
        {
            let mut channels = self.channels.write().expect("channel map lock");
            let channel = channels.entry(execution_id).or_insert_with(|| Channel {
                sender: broadcast::channel(self.capacity).0,
                sequence: Arc::new(AtomicU64::new(0)),
            });
            let event = ExecutionEvent {
                execution_id,
                sequence: channel.sequence.fetch_add(1, Ordering::SeqCst),
                timestamp: Utc::now(),
                payload,
            };
            // No subscribers is fine; the send error only means that.
            let _ = channel.sender.send(event);
            if terminal {
                channels.remove(&execution_id);
            }
        }
    }

    /// Publish on behalf of a plan. The plan registration table wins over
    /// the task-local scope when both are present.
    pub fn publish_for_plan(&self, plan_id: Uuid, payload: EventPayload) {
        let routed = self
            .plan_routes
            .read()
            .expect("plan route lock")
            .get(&plan_id)
            .copied();
        match routed.or_else(current_execution) {
            Some(execution_id) => self.publish_to(execution_id, payload),
            None => {
                tracing::warn!(plan_id = %plan_id, kind = payload.kind(), "Plan event with no execution route");
            }
        }
    }

    /// Route a plan's events to an execution.
    pub fn register_plan(&self, plan_id: Uuid, execution_id: Uuid) {
        self.plan_routes
            .write()
            .expect("plan route lock")
            .insert(plan_id, execution_id);
    }

    pub fn unregister_plan(&self, plan_id: Uuid) {
        self.plan_routes
            .write()
            .expect("plan route lock")
            .remove(&plan_id);
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_started(node: &str) -> EventPayload {
        EventPayload::NodeStarted {
            node_id: node.to_string(),
        }
    }

    #[tokio::test]
    async fn test_events_are_ordered_per_execution() {
        let bus = EventBroadcaster::default();
        let execution_id = Uuid::new_v4();
        let mut rx = bus.subscribe(execution_id);

        bus.publish_to(execution_id, node_started("a"));
        bus.publish_to(execution_id, node_started("b"));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
    }

    #[tokio::test]
    async fn test_scoped_publish_routes_to_bound_execution() {
        let bus = Arc::new(EventBroadcaster::default());
        let execution_id = Uuid::new_v4();
        let mut rx = bus.subscribe(execution_id);

        let bus2 = bus.clone();
        run_as(execution_id, async move {
            bus2.publish(node_started("scoped"));
        })
        .await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.execution_id, execution_id);
        assert_eq!(event.payload.kind(), "node.started");
    }

    #[tokio::test]
    async fn test_plan_route_takes_precedence_over_scope() {
        let bus = Arc::new(EventBroadcaster::default());
        let scoped_execution = Uuid::new_v4();
        let routed_execution = Uuid::new_v4();
        let plan_id = Uuid::new_v4();
        bus.register_plan(plan_id, routed_execution);

        let mut routed_rx = bus.subscribe(routed_execution);
        let mut scoped_rx = bus.subscribe(scoped_execution);

        let bus2 = bus.clone();
        run_as(scoped_execution, async move {
            bus2.publish_for_plan(
                plan_id,
                EventPayload::PlanCompleted {
                    plan_id,
                    success: true,
                },
            );
        })
        .await;

        assert!(routed_rx.recv().await.is_ok());
        assert!(scoped_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publisher_never_blocks_on_slow_subscriber() {
        let bus = EventBroadcaster::new(4);
        let execution_id = Uuid::new_v4();
        let mut rx = bus.subscribe(execution_id);

        for i in 0..64 {
            bus.publish_to(execution_id, node_started(&format!("n{}", i)));
        }

        // The lagged receiver reports the loss, then resumes with the
        // newest buffered events.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(missed)) => assert!(missed > 0),
            other => panic!("expected lag, got {:?}", other),
        }
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_completed_event_closes_the_channel() {
        let bus = EventBroadcaster::default();
        let execution_id = Uuid::new_v4();
        let mut rx = bus.subscribe(execution_id);

        bus.publish_to(
            execution_id,
            EventPayload::ExecutionCompleted {
                success: true,
                final_node_id: Some("end".to_string()),
                output: HashMap::new(),
            },
        );

        assert_eq!(rx.recv().await.unwrap().payload.kind(), "execution.completed");
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
