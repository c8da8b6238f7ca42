//! Priority ordering for waiting jobs
//!
//! Binary heap keyed on (priority, arrival sequence): High drains first,
//! FIFO within a tier.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tokio::sync::oneshot;

use super::job::Job;
use crate::error::JobError;

/// Terminal result delivered to whoever holds the job's ticket
pub type JobResult = std::result::Result<serde_json::Value, JobError>;

/// A job plus its completion rendezvous, carried through retries
pub struct QueuedJob {
    pub job: Job,
    pub done: Option<oneshot::Sender<JobResult>>,
}

struct PrioritizedJob {
    entry: QueuedJob,
    sequence: u64,
}

impl PartialEq for PrioritizedJob {
    fn eq(&self, other: &Self) -> bool {
        self.entry.job.priority == other.entry.job.priority && self.sequence == other.sequence
    }
}

impl Eq for PrioritizedJob {}

impl PartialOrd for PrioritizedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PrioritizedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reverse so the numerically-smallest
        // priority (High=0) surfaces first, then lowest sequence (FIFO)
        match other.entry.job.priority.cmp(&self.entry.job.priority) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ord => ord,
        }
    }
}

/// Waiting-set for one named queue
#[derive(Default)]
pub struct PendingJobs {
    heap: BinaryHeap<PrioritizedJob>,
    sequence_counter: u64,
}

impl PendingJobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: QueuedJob) {
        let sequence = self.sequence_counter;
        self.sequence_counter += 1;
        self.heap.push(PrioritizedJob { entry, sequence });
    }

    pub fn pop(&mut self) -> Option<QueuedJob> {
        self.heap.pop().map(|p| p.entry)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::job::JobPriority;

    fn make_entry(tag: &str, priority: JobPriority) -> QueuedJob {
        QueuedJob {
            job: Job::new("test", serde_json::json!({ "tag": tag }), 3).with_priority(priority),
            done: None,
        }
    }

    fn tag(entry: &QueuedJob) -> String {
        entry.job.payload["tag"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_priority_ordering() {
        let mut pending = PendingJobs::new();

        pending.push(make_entry("normal", JobPriority::Normal));
        pending.push(make_entry("low", JobPriority::Low));
        pending.push(make_entry("high", JobPriority::High));

        assert_eq!(tag(&pending.pop().unwrap()), "high");
        assert_eq!(tag(&pending.pop().unwrap()), "normal");
        assert_eq!(tag(&pending.pop().unwrap()), "low");
        assert!(pending.pop().is_none());
    }

    #[test]
    fn test_fifo_within_tier() {
        let mut pending = PendingJobs::new();

        pending.push(make_entry("first", JobPriority::Normal));
        pending.push(make_entry("second", JobPriority::Normal));
        pending.push(make_entry("third", JobPriority::Normal));

        assert_eq!(tag(&pending.pop().unwrap()), "first");
        assert_eq!(tag(&pending.pop().unwrap()), "second");
        assert_eq!(tag(&pending.pop().unwrap()), "third");
    }

    #[test]
    fn test_high_cuts_ahead_of_earlier_normal() {
        let mut pending = PendingJobs::new();

        pending.push(make_entry("early-normal", JobPriority::Normal));
        pending.push(make_entry("late-high", JobPriority::High));

        assert_eq!(tag(&pending.pop().unwrap()), "late-high");
        assert_eq!(tag(&pending.pop().unwrap()), "early-normal");
    }
}
