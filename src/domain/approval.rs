//! Approval request rows for the human-in-the-loop gate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What the requester is asking permission for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    FindItem,
    Negotiate,
    Purchase,
    List,
}

impl fmt::Display for ApprovalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FindItem => "find_item",
            Self::Negotiate => "negotiate",
            Self::Purchase => "purchase",
            Self::List => "list",
        };
        write!(f, "{s}")
    }
}

/// Resolution state. A request leaves Pending exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// A suspension point waiting on an out-of-band decision.
/// Immutable once resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub command_id: Uuid,
    pub kind: ApprovalKind,
    /// Opaque payload shown to the decision maker (opportunity details,
    /// negotiated price, listing draft, ...)
    pub context: serde_json::Value,
    pub status: ApprovalStatus,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub reason: Option<String>,
}

impl ApprovalRequest {
    pub fn new(command_id: Uuid, kind: ApprovalKind, context: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            command_id,
            kind,
            context,
            status: ApprovalStatus::Pending,
            requested_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
            reason: None,
        }
    }
}
