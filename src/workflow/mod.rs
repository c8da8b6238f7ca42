//! Top-level workflow coordination

pub mod executor;

pub use executor::{
    Collaborators, WorkflowExecutor, QUEUE_ANALYZE, QUEUE_FIND, QUEUE_LIST, QUEUE_PURCHASE,
};
