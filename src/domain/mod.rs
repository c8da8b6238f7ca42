//! Domain types shared across the engine

pub mod approval;
pub mod budget;
pub mod command;
pub mod negotiation;
pub mod opportunity;

pub use approval::{ApprovalKind, ApprovalRequest, ApprovalStatus};
pub use budget::{Budget, BudgetStatus, BudgetSummary};
pub use command::{Command, CommandStatus, WorkflowStep};
pub use negotiation::{
    MessageAssessment, MessageIntent, NegotiationRound, NegotiationThread, RoundKind, RoundStatus,
    Sentiment, ThreadStatus,
};
pub use opportunity::{
    DealAnalysis, DealVerdict, ListingResult, Opportunity, ParsedCommand, Platform, PurchasedItem,
    SearchParams,
};
