use thiserror::Error;

/// Main error type for the resale engine
#[derive(Error, Debug)]
pub enum ReflipError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Command intake errors
    #[error("Could not parse command: {0}")]
    Parse(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    // Workflow errors
    #[error("Command not found: {0}")]
    CommandNotFound(uuid::Uuid),

    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Workflow halted: {0}")]
    WorkflowHalted(String),

    // Component errors
    #[error("Budget error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Negotiation error: {0}")]
    Negotiation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for ReflipError
pub type Result<T> = std::result::Result<T, ReflipError>;

/// Specific error types for the budget ledger
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Budget not found: {budget_id}")]
    NotFound { budget_id: uuid::Uuid },

    #[error("Budget is {status}, no further mutations allowed")]
    Closed { status: String },

    #[error("Budget expired at {expired_at}")]
    Expired {
        expired_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("Invariant violated on budget {budget_id}: spent {spent} + reserved {reserved} + remaining {remaining} != total {total}")]
    InvariantViolated {
        budget_id: uuid::Uuid,
        total: rust_decimal::Decimal,
        spent: rust_decimal::Decimal,
        reserved: rust_decimal::Decimal,
        remaining: rust_decimal::Decimal,
    },

    #[error("Amount must be non-negative, got {amount}")]
    NegativeAmount { amount: rust_decimal::Decimal },
}

/// Specific error types for the approval gate
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApprovalError {
    #[error("Approval request not found: {request_id}")]
    NotFound { request_id: uuid::Uuid },

    #[error("Approval request {request_id} already resolved as {status}")]
    AlreadyResolved {
        request_id: uuid::Uuid,
        status: String,
    },

    #[error("Approval gate is shutting down")]
    GateClosed,
}

/// Classification of a job handler failure, used by the queue retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobErrorKind {
    /// Caller supplied bad input; retrying cannot help
    InvalidInput,
    /// Authentication/authorization failure against a collaborator
    Auth,
    /// Budget admission was denied
    InsufficientFunds,
    /// Referenced entity does not exist
    NotFound,
    /// Network-level failure talking to a collaborator
    Network,
    /// Collaborator did not answer in time
    Timeout,
    /// Collaborator rate-limited us
    RateLimited,
    /// Anything else
    Internal,
}

impl JobErrorKind {
    /// Non-retryable kinds fail the job permanently on first occurrence
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidInput | Self::Auth | Self::InsufficientFunds | Self::NotFound
        )
    }
}

/// Error returned by job handlers, carrying its retry classification
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(JobErrorKind::InvalidInput, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(JobErrorKind::Auth, message)
    }

    pub fn insufficient_funds(message: impl Into<String>) -> Self {
        Self::new(JobErrorKind::InsufficientFunds, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(JobErrorKind::NotFound, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(JobErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(JobErrorKind::Timeout, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(JobErrorKind::RateLimited, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(JobErrorKind::Internal, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<ReflipError> for JobError {
    fn from(err: ReflipError) -> Self {
        match err {
            ReflipError::Job(e) => e,
            ReflipError::Parse(m) | ReflipError::Validation(m) => Self::invalid_input(m),
            ReflipError::Ledger(e) => Self::insufficient_funds(e.to_string()),
            ReflipError::CommandNotFound(id) => Self::not_found(id.to_string()),
            other => Self::internal(other.to_string()),
        }
    }
}
