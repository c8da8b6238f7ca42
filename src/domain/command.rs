//! Command: one user request driven through the workflow

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::opportunity::ParsedCommand;

/// Lifecycle status of a command. Transitions are monotonic in declaration
/// order, except Failed which is reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Parsing,
    Finding,
    Negotiating,
    Purchasing,
    Listing,
    Completed,
    Failed,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Monotonic forward transitions only; Failed from any non-terminal state
    pub fn can_transition_to(&self, next: CommandStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == CommandStatus::Failed {
            return true;
        }
        next > *self && next != CommandStatus::Failed
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Parsing => "parsing",
            Self::Finding => "finding",
            Self::Negotiating => "negotiating",
            Self::Purchasing => "purchasing",
            Self::Listing => "listing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// The ordered steps the executor drives a command through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    Find,
    ApproveFind,
    Analyze,
    ApproveNegotiate,
    Negotiate,
    Purchase,
    ApprovePurchase,
    List,
    ApproveList,
    Complete,
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Find => "find",
            Self::ApproveFind => "approve_find",
            Self::Analyze => "analyze",
            Self::ApproveNegotiate => "approve_negotiate",
            Self::Negotiate => "negotiate",
            Self::Purchase => "purchase",
            Self::ApprovePurchase => "approve_purchase",
            Self::List => "list",
            Self::ApproveList => "approve_list",
            Self::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

/// One user request: owns exactly one budget, tracks progress counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    /// Raw natural-language request as received
    pub text: String,
    /// Structured parameters produced by the parser collaborator
    pub params: Option<ParsedCommand>,
    pub status: CommandStatus,
    pub current_step: WorkflowStep,
    pub budget_id: Option<Uuid>,
    pub items_found: u32,
    pub items_purchased: u32,
    pub items_listed: u32,
    /// Recorded when status becomes Failed
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Command {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            params: None,
            status: CommandStatus::Parsing,
            current_step: WorkflowStep::Find,
            budget_id: None,
            items_found: 0,
            items_purchased: 0,
            items_listed: 0,
            failure_reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_transitions() {
        assert!(CommandStatus::Parsing.can_transition_to(CommandStatus::Finding));
        assert!(CommandStatus::Finding.can_transition_to(CommandStatus::Purchasing));
        assert!(!CommandStatus::Purchasing.can_transition_to(CommandStatus::Finding));
        assert!(!CommandStatus::Listing.can_transition_to(CommandStatus::Listing));
    }

    #[test]
    fn test_failed_reachable_from_any_non_terminal() {
        for status in [
            CommandStatus::Parsing,
            CommandStatus::Finding,
            CommandStatus::Negotiating,
            CommandStatus::Purchasing,
            CommandStatus::Listing,
        ] {
            assert!(status.can_transition_to(CommandStatus::Failed));
        }
        assert!(!CommandStatus::Completed.can_transition_to(CommandStatus::Failed));
        assert!(!CommandStatus::Failed.can_transition_to(CommandStatus::Failed));
    }
}
