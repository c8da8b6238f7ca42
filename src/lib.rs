pub mod adapters;
pub mod approval;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod ledger;
pub mod negotiation;
pub mod persistence;
pub mod queue;
pub mod workflow;

pub use approval::{ApprovalGate, Decision};
pub use config::AppConfig;
pub use error::{ApprovalError, JobError, JobErrorKind, LedgerError, ReflipError, Result};
pub use events::{EventBus, WorkflowEvent};
pub use ledger::BudgetLedger;
pub use negotiation::{
    evaluate_counter, CounterDecision, NegotiationEngine, NegotiationStrategy, ThreadOutcome,
};
pub use persistence::WorkflowStore;
pub use queue::{
    DeadLetter, Job, JobHandler, JobPriority, JobQueue, JobStatus, JobTicket, QueueStatus,
};
pub use workflow::{Collaborators, WorkflowExecutor};
