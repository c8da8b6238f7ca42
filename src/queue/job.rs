//! Job rows and retry policy primitives

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Drain order: High first, FIFO within a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    High = 0,
    Normal = 1,
    Low = 2,
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

/// One unit of asynchronous work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub queue: String,
    pub payload: serde_json::Value,
    pub priority: JobPriority,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(queue: impl Into<String>, payload: serde_json::Value, max_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: queue.into(),
            payload,
            priority: JobPriority::Normal,
            attempts_made: 0,
            max_attempts,
            status: JobStatus::Waiting,
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// Exponential backoff: `base * 2^(attempts_made - 1)`, capped.
/// `attempts_made` counts the attempt that just failed, so the first retry
/// waits exactly `base`.
pub fn backoff_delay(base_ms: u64, cap_ms: u64, attempts_made: u32) -> Duration {
    let exp = attempts_made.saturating_sub(1);
    let delay = base_ms.saturating_mul(2u64.saturating_pow(exp));
    Duration::from_millis(delay.min(cap_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(2000, 30_000, 1), Duration::from_millis(2000));
        assert_eq!(backoff_delay(2000, 30_000, 2), Duration::from_millis(4000));
        assert_eq!(backoff_delay(2000, 30_000, 3), Duration::from_millis(8000));
        assert_eq!(backoff_delay(2000, 30_000, 5), Duration::from_millis(30_000)); // capped
    }

    #[test]
    fn test_priority_order() {
        assert!(JobPriority::High < JobPriority::Normal);
        assert!(JobPriority::Normal < JobPriority::Low);
    }
}
