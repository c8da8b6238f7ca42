//! Approval gate
//!
//! Suspends workflow execution at named checkpoints until an out-of-band
//! decision arrives or the timeout elapses. Each request is a one-shot
//! rendezvous: a `oneshot::Sender` keyed by request id, consumed by exactly
//! one of decision / timeout / cancellation. Settlement and the stored
//! status flip happen under the same lock, so a second resolution attempt
//! always observes the first and fails with `AlreadyResolved`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{ApprovalKind, ApprovalRequest, ApprovalStatus};
use crate::error::ApprovalError;
use crate::events::{EventBus, WorkflowEvent};

type GateResult<T> = std::result::Result<T, ApprovalError>;

/// Terminal decision delivered to the waiting requester
#[derive(Debug, Clone)]
pub struct Decision {
    pub approved: bool,
    pub reason: Option<String>,
}

struct GateState {
    requests: HashMap<Uuid, ApprovalRequest>,
    pending: HashMap<Uuid, oneshot::Sender<Decision>>,
}

/// Human-in-the-loop checkpoint. Clone-friendly; clones share state.
#[derive(Clone)]
pub struct ApprovalGate {
    state: Arc<Mutex<GateState>>,
    bus: EventBus,
    timeout: Duration,
}

impl ApprovalGate {
    pub fn new(bus: EventBus, timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(GateState {
                requests: HashMap::new(),
                pending: HashMap::new(),
            })),
            bus,
            timeout,
        }
    }

    /// Suspend until the request is decided, expires, or is cancelled.
    /// Use `register` + `await_decision` instead when the request id is
    /// needed before suspending (e.g. for cancellation bookkeeping).
    pub async fn request(
        &self,
        command_id: Uuid,
        kind: ApprovalKind,
        context: serde_json::Value,
    ) -> GateResult<Decision> {
        let (request_id, rx) = self.register(command_id, kind, context).await;
        self.await_decision(request_id, rx).await
    }

    /// Persist a pending request and arm the rendezvous; does not suspend
    pub async fn register(
        &self,
        command_id: Uuid,
        kind: ApprovalKind,
        context: serde_json::Value,
    ) -> (Uuid, oneshot::Receiver<Decision>) {
        let request = ApprovalRequest::new(command_id, kind, context.clone());
        let request_id = request.id;
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.state.lock().await;
            state.requests.insert(request_id, request);
            state.pending.insert(request_id, tx);
        }

        info!(
            approval_id = %request_id,
            command_id = %command_id,
            kind = %kind,
            "approval requested"
        );
        self.bus.publish(WorkflowEvent::ApprovalRequested {
            approval_id: request_id,
            command_id,
            kind,
            context,
        });

        (request_id, rx)
    }

    /// Wait on a registered request with the gate timeout armed
    pub async fn await_decision(
        &self,
        request_id: Uuid,
        mut rx: oneshot::Receiver<Decision>,
    ) -> GateResult<Decision> {
        tokio::select! {
            decision = &mut rx => Ok(decision.unwrap_or(Decision {
                approved: false,
                reason: Some("approval channel dropped".to_string()),
            })),
            _ = tokio::time::sleep(self.timeout) => {
                if self.expire(request_id).await? {
                    Ok(Decision {
                        approved: false,
                        reason: Some("approval timed out".to_string()),
                    })
                } else {
                    // a decision landed at the same instant; take it
                    Ok(rx.await.unwrap_or(Decision {
                        approved: false,
                        reason: Some("approval channel dropped".to_string()),
                    }))
                }
            }
        }
    }

    /// External decision intake: the single mutation point by which a human
    /// (or automated policy) affects a suspended workflow.
    pub async fn resolve(
        &self,
        request_id: Uuid,
        approved: bool,
        resolved_by: impl Into<String>,
        reason: Option<String>,
    ) -> GateResult<()> {
        let status = if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        self.settle(request_id, status, Some(resolved_by.into()), reason.clone())
            .await?;

        self.bus.publish(WorkflowEvent::ApprovalResolved {
            approval_id: request_id,
            approved,
            reason,
        });
        Ok(())
    }

    /// Executor-side cancellation (command aborted). Resolves the waiter
    /// with `false` and records the request as rejected.
    pub async fn cancel(&self, request_id: Uuid) -> GateResult<()> {
        self.settle(
            request_id,
            ApprovalStatus::Rejected,
            Some("executor".to_string()),
            Some("command cancelled".to_string()),
        )
        .await?;
        self.bus.publish(WorkflowEvent::ApprovalResolved {
            approval_id: request_id,
            approved: false,
            reason: Some("command cancelled".to_string()),
        });
        Ok(())
    }

    /// Timer path. Unlike `resolve`, racing an already-settled request is
    /// normal here (decision arrived just before the timer fired), so it
    /// reports `false` instead of erroring.
    async fn expire(&self, request_id: Uuid) -> GateResult<bool> {
        match self.settle(request_id, ApprovalStatus::Expired, None, None).await {
            Ok(()) => {
                warn!(approval_id = %request_id, "approval expired without a decision");
                self.bus.publish(WorkflowEvent::ApprovalExpired {
                    approval_id: request_id,
                });
                Ok(true)
            }
            Err(ApprovalError::AlreadyResolved { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Flip a pending request to a resolved status and fire the rendezvous.
    /// Exactly-once: the second caller gets `AlreadyResolved` and the stored
    /// resolution is untouched.
    async fn settle(
        &self,
        request_id: Uuid,
        status: ApprovalStatus,
        resolved_by: Option<String>,
        reason: Option<String>,
    ) -> GateResult<()> {
        let mut state = self.state.lock().await;
        let request = state
            .requests
            .get_mut(&request_id)
            .ok_or(ApprovalError::NotFound { request_id })?;

        if request.status.is_resolved() {
            return Err(ApprovalError::AlreadyResolved {
                request_id,
                status: request.status.to_string(),
            });
        }

        request.status = status;
        request.resolved_at = Some(chrono::Utc::now());
        request.resolved_by = resolved_by;
        request.reason = reason.clone();

        let approved = status == ApprovalStatus::Approved;
        if let Some(tx) = state.pending.remove(&request_id) {
            // receiver may already be gone (requester task dropped); fine
            let _ = tx.send(Decision { approved, reason });
        }

        debug!(approval_id = %request_id, status = %status, "approval settled");
        Ok(())
    }

    /// Stored request snapshot (query surface / persistence)
    pub async fn get(&self, request_id: Uuid) -> GateResult<ApprovalRequest> {
        let state = self.state.lock().await;
        state
            .requests
            .get(&request_id)
            .cloned()
            .ok_or(ApprovalError::NotFound { request_id })
    }

    /// Pending request ids for a command (cancellation support)
    pub async fn pending_for_command(&self, command_id: Uuid) -> Vec<Uuid> {
        let state = self.state.lock().await;
        state
            .requests
            .values()
            .filter(|r| r.command_id == command_id && !r.status.is_resolved())
            .map(|r| r.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate_with_timeout(secs: u64) -> ApprovalGate {
        ApprovalGate::new(EventBus::new(16), Duration::from_secs(secs))
    }

    #[tokio::test]
    async fn test_resolve_approved() {
        let gate = gate_with_timeout(1800);
        let (id, rx) = gate
            .register(Uuid::new_v4(), ApprovalKind::Purchase, serde_json::json!({}))
            .await;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.await_decision(id, rx).await })
        };

        gate.resolve(id, true, "operator", None).await.unwrap();
        let decision = waiter.await.unwrap().unwrap();
        assert!(decision.approved);

        let stored = gate.get(id).await.unwrap();
        assert_eq!(stored.status, ApprovalStatus::Approved);
        assert_eq!(stored.resolved_by.as_deref(), Some("operator"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_expires_request() {
        // 30-minute gate, simulated clock
        let gate = gate_with_timeout(1800);
        let (id, rx) = gate
            .register(Uuid::new_v4(), ApprovalKind::FindItem, serde_json::json!({}))
            .await;

        let decision = gate.await_decision(id, rx).await.unwrap();
        assert!(!decision.approved);

        let stored = gate.get(id).await.unwrap();
        assert_eq!(stored.status, ApprovalStatus::Expired);
    }

    #[tokio::test]
    async fn test_double_resolution_fails_and_preserves_first() {
        let gate = gate_with_timeout(1800);
        let (id, _rx) = gate
            .register(Uuid::new_v4(), ApprovalKind::Negotiate, serde_json::json!({}))
            .await;

        gate.resolve(id, true, "operator", Some("looks good".to_string()))
            .await
            .unwrap();

        let err = gate
            .resolve(id, false, "intruder", Some("changed my mind".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::AlreadyResolved { .. }));

        // first resolution untouched
        let stored = gate.get(id).await.unwrap();
        assert_eq!(stored.status, ApprovalStatus::Approved);
        assert_eq!(stored.resolved_by.as_deref(), Some("operator"));
        assert_eq!(stored.reason.as_deref(), Some("looks good"));
    }

    #[tokio::test]
    async fn test_cancel_resolves_false() {
        let gate = gate_with_timeout(1800);
        let (id, rx) = gate
            .register(Uuid::new_v4(), ApprovalKind::List, serde_json::json!({}))
            .await;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.await_decision(id, rx).await })
        };

        gate.cancel(id).await.unwrap();
        let decision = waiter.await.unwrap().unwrap();
        assert!(!decision.approved);
        assert_eq!(
            gate.get(id).await.unwrap().status,
            ApprovalStatus::Rejected
        );
    }

    #[tokio::test]
    async fn test_events_published() {
        let bus = EventBus::new(16);
        let mut rx_events = bus.subscribe();
        let gate = ApprovalGate::new(bus, Duration::from_secs(1800));

        let (id, _rx) = gate
            .register(Uuid::new_v4(), ApprovalKind::Purchase, serde_json::json!({}))
            .await;
        gate.resolve(id, false, "operator", Some("too pricey".to_string()))
            .await
            .unwrap();

        assert!(matches!(
            rx_events.recv().await.unwrap(),
            WorkflowEvent::ApprovalRequested { .. }
        ));
        match rx_events.recv().await.unwrap() {
            WorkflowEvent::ApprovalResolved { approved, .. } => assert!(!approved),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
