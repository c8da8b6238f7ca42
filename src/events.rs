//! Workflow event bus
//!
//! A closed enum of every event the engine publishes, fanned out over a
//! `tokio::sync::broadcast` channel. Subscribers that fall behind lose the
//! oldest events (lagged receivers), never block publishers.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    ApprovalKind, CommandStatus, NegotiationThread, Opportunity, ThreadStatus, WorkflowStep,
};

/// Everything the engine announces to the outside world
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    ApprovalRequested {
        approval_id: Uuid,
        command_id: Uuid,
        kind: ApprovalKind,
        context: serde_json::Value,
    },
    ApprovalResolved {
        approval_id: Uuid,
        approved: bool,
        reason: Option<String>,
    },
    ApprovalExpired {
        approval_id: Uuid,
    },
    CommandProgress {
        command_id: Uuid,
        status: CommandStatus,
        current_step: WorkflowStep,
    },
    CommandCompleted {
        command_id: Uuid,
    },
    CommandFailed {
        command_id: Uuid,
        reason: String,
    },
    ItemDiscovered {
        command_id: Uuid,
        opportunity: Opportunity,
    },
    NegotiationStarted {
        thread_id: Uuid,
        opportunity_id: Uuid,
        opening_offer: Decimal,
    },
    NegotiationUpdated {
        thread_id: Uuid,
        status: ThreadStatus,
        current_offer: Decimal,
        round: u32,
    },
    NegotiationAccepted {
        thread_id: Uuid,
        final_price: Decimal,
    },
    NegotiationRejected {
        thread_id: Uuid,
        reason: String,
    },
}

impl WorkflowEvent {
    /// Stable name for logs and persistence
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ApprovalRequested { .. } => "approval_requested",
            Self::ApprovalResolved { .. } => "approval_resolved",
            Self::ApprovalExpired { .. } => "approval_expired",
            Self::CommandProgress { .. } => "command_progress",
            Self::CommandCompleted { .. } => "command_completed",
            Self::CommandFailed { .. } => "command_failed",
            Self::ItemDiscovered { .. } => "item_discovered",
            Self::NegotiationStarted { .. } => "negotiation_started",
            Self::NegotiationUpdated { .. } => "negotiation_updated",
            Self::NegotiationAccepted { .. } => "negotiation_accepted",
            Self::NegotiationRejected { .. } => "negotiation_rejected",
        }
    }

    /// Snapshot helper for negotiation lifecycle events
    pub fn negotiation_updated(thread: &NegotiationThread) -> Self {
        Self::NegotiationUpdated {
            thread_id: thread.id,
            status: thread.status,
            current_offer: thread.current_offer,
            round: thread.rounds.last().map(|r| r.number).unwrap_or(0),
        }
    }
}

/// Fan-out bus. Cloning shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish to all current subscribers. A bus with no subscribers drops
    /// the event, which is fine: nobody was listening.
    pub fn publish(&self, event: WorkflowEvent) {
        debug!(event = event.kind(), "publishing workflow event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_receives_published_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let command_id = Uuid::new_v4();
        bus.publish(WorkflowEvent::CommandCompleted { command_id });

        match rx.recv().await.unwrap() {
            WorkflowEvent::CommandCompleted { command_id: id } => assert_eq!(id, command_id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new(16);
        // must not panic or block
        bus.publish(WorkflowEvent::ApprovalExpired {
            approval_id: Uuid::new_v4(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_kind_names() {
        let event = WorkflowEvent::CommandFailed {
            command_id: Uuid::new_v4(),
            reason: "budget rejected".to_string(),
        };
        assert_eq!(event.kind(), "command_failed");
    }
}
