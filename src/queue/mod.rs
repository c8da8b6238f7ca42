//! Priority job queue with bounded worker pools, retry/backoff, and a
//! dead-letter log

pub mod job;
pub mod pending;
pub mod worker;

pub use job::{backoff_delay, Job, JobPriority, JobStatus};
pub use pending::JobResult;
pub use worker::{
    DeadLetter, JobHandler, JobQueue, JobTicket, MetricsSnapshot, QueueMetrics, QueueStatus,
};
