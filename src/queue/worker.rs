//! Named job queues with bounded worker pools
//!
//! Each registered queue owns a priority waiting-set and `concurrency`
//! worker tasks. Failed handler runs are classified: non-retryable errors
//! dead-letter immediately, retryable ones requeue with exponential backoff
//! until `max_attempts` is exhausted. Completed jobs are dropped; failed
//! jobs are retained in the dead-letter log for inspection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::{backoff_delay, Job, JobPriority, JobStatus};
use super::pending::{JobResult, PendingJobs, QueuedJob};
use crate::config::QueueConfig;
use crate::error::{ReflipError, Result};
use crate::persistence::WorkflowStore;

/// Handler invoked once per job attempt
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> JobResult;
}

/// Per-queue counters for observability
#[derive(Default)]
pub struct QueueMetrics {
    succeeded: AtomicU64,
    failed: AtomicU64,
    total_duration_ms: AtomicU64,
}

impl QueueMetrics {
    fn record_success(&self, duration_ms: u64) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.total_duration_ms.fetch_add(duration_ms, Ordering::Relaxed);
    }

    fn record_failure(&self, duration_ms: u64) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.total_duration_ms.fetch_add(duration_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let total = succeeded + failed;
        let mean_duration_ms = if total > 0 {
            self.total_duration_ms.load(Ordering::Relaxed) / total
        } else {
            0
        };
        MetricsSnapshot {
            succeeded,
            failed,
            mean_duration_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub succeeded: u64,
    pub failed: u64,
    pub mean_duration_ms: u64,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ok={} failed={} mean={}ms",
            self.succeeded, self.failed, self.mean_duration_ms
        )
    }
}

/// A permanently failed job, retained for inspection
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub job: Job,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Queue snapshot for the query surface
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStatus {
    pub waiting: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
    pub delayed: usize,
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "waiting={} active={} completed={} failed={} delayed={}",
            self.waiting, self.active, self.completed, self.failed, self.delayed
        )
    }
}

struct NamedQueue {
    name: String,
    handler: Arc<dyn JobHandler>,
    pending: Mutex<PendingJobs>,
    notify: Notify,
    active: AtomicUsize,
    delayed: AtomicUsize,
    metrics: QueueMetrics,
    dead_letters: Mutex<Vec<DeadLetter>>,
    store: Option<Arc<WorkflowStore>>,
}

/// Completion rendezvous returned by `enqueue`; resolves when the job
/// reaches a terminal state (after all retries)
pub struct JobTicket {
    pub job_id: Uuid,
    rx: oneshot::Receiver<JobResult>,
}

impl JobTicket {
    /// Await the job's terminal result. `Cancelled` means the queue shut
    /// down before the job finished.
    pub async fn result(self) -> Result<serde_json::Value> {
        match self.rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(job_err)) => Err(job_err.into()),
            Err(_) => Err(ReflipError::Cancelled),
        }
    }
}

/// Registry of named queues. The substrate every asynchronous workflow
/// step runs on.
pub struct JobQueue {
    queues: RwLock<HashMap<String, Arc<NamedQueue>>>,
    config: QueueConfig,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    store: Option<Arc<WorkflowStore>>,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            queues: RwLock::new(HashMap::new()),
            config,
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
            store: None,
        }
    }

    /// Persist dead letters through this store as they are recorded
    pub fn with_store(mut self, store: Arc<WorkflowStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Create a queue and spawn its worker pool. Re-registering a name
    /// replaces the handler for new workers but keeps the old pool; avoid.
    pub async fn register(&self, name: &str, handler: Arc<dyn JobHandler>) {
        let queue = Arc::new(NamedQueue {
            name: name.to_string(),
            handler,
            pending: Mutex::new(PendingJobs::new()),
            notify: Notify::new(),
            active: AtomicUsize::new(0),
            delayed: AtomicUsize::new(0),
            metrics: QueueMetrics::default(),
            dead_letters: Mutex::new(Vec::new()),
            store: self.store.clone(),
        });

        self.queues
            .write()
            .await
            .insert(name.to_string(), queue.clone());

        let mut workers = self.workers.lock().await;
        for _ in 0..self.config.concurrency {
            let queue = queue.clone();
            let config = self.config.clone();
            let shutdown = self.shutdown_tx.subscribe();
            workers.push(tokio::spawn(worker_loop(queue, config, shutdown)));
        }

        info!(
            queue = name,
            concurrency = self.config.concurrency,
            "queue registered"
        );
    }

    /// Add a job; returns a ticket that resolves with its terminal result
    pub async fn enqueue(
        &self,
        queue_name: &str,
        payload: serde_json::Value,
        priority: JobPriority,
    ) -> Result<JobTicket> {
        let queues = self.queues.read().await;
        let queue = queues
            .get(queue_name)
            .ok_or_else(|| ReflipError::Internal(format!("unknown queue: {queue_name}")))?;

        let job = Job::new(queue_name, payload, self.config.max_attempts).with_priority(priority);
        let job_id = job.id;
        let (tx, rx) = oneshot::channel();

        debug!(queue = queue_name, job_id = %job_id, priority = %job.priority, "job enqueued");
        queue.pending.lock().await.push(QueuedJob {
            job,
            done: Some(tx),
        });
        queue.notify.notify_one();

        Ok(JobTicket { job_id, rx })
    }

    /// Query-surface snapshot for one queue
    pub async fn status(&self, queue_name: &str) -> Result<QueueStatus> {
        let queues = self.queues.read().await;
        let queue = queues
            .get(queue_name)
            .ok_or_else(|| ReflipError::Internal(format!("unknown queue: {queue_name}")))?;

        let metrics = queue.metrics.snapshot();
        let waiting = queue.pending.lock().await.len();
        Ok(QueueStatus {
            waiting,
            active: queue.active.load(Ordering::Relaxed),
            completed: metrics.succeeded,
            failed: metrics.failed,
            delayed: queue.delayed.load(Ordering::Relaxed),
        })
    }

    pub async fn metrics(&self, queue_name: &str) -> Result<MetricsSnapshot> {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| q.metrics.snapshot())
            .ok_or_else(|| ReflipError::Internal(format!("unknown queue: {queue_name}")))
    }

    /// Dead-letter log for one queue (permanently failed jobs)
    pub async fn dead_letters(&self, queue_name: &str) -> Vec<DeadLetter> {
        let queues = self.queues.read().await;
        match queues.get(queue_name) {
            Some(queue) => queue.dead_letters.lock().await.clone(),
            None => Vec::new(),
        }
    }

    /// Stop all workers after their in-flight jobs finish. Waiting jobs are
    /// abandoned; their tickets resolve with `Cancelled`.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }
        info!("job queue shut down");
    }
}

async fn worker_loop(
    queue: Arc<NamedQueue>,
    config: QueueConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let entry = queue.pending.lock().await.pop();
        let Some(mut entry) = entry else {
            tokio::select! {
                _ = queue.notify.notified() => {}
                changed = shutdown.changed() => {
                    // a dropped sender means the queue itself is gone
                    if changed.is_err() {
                        break;
                    }
                }
            }
            continue;
        };

        entry.job.status = JobStatus::Active;
        entry.job.attempts_made += 1;
        queue.active.fetch_add(1, Ordering::Relaxed);

        let started = std::time::Instant::now();
        let result = queue.handler.handle(&entry.job).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        queue.active.fetch_sub(1, Ordering::Relaxed);

        match result {
            Ok(value) => {
                queue.metrics.record_success(duration_ms);
                debug!(
                    queue = %queue.name,
                    job_id = %entry.job.id,
                    attempt = entry.job.attempts_made,
                    "job completed"
                );
                if let Some(done) = entry.done.take() {
                    let _ = done.send(Ok(value));
                }
                // remove_on_complete: the job is dropped here
            }
            Err(err) if err.is_retryable() && entry.job.attempts_made < entry.job.max_attempts => {
                let delay = backoff_delay(
                    config.backoff_base_ms,
                    config.backoff_cap_ms,
                    entry.job.attempts_made,
                );
                warn!(
                    queue = %queue.name,
                    job_id = %entry.job.id,
                    attempt = entry.job.attempts_made,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "job failed, retrying"
                );
                entry.job.status = JobStatus::Delayed;
                queue.delayed.fetch_add(1, Ordering::Relaxed);

                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    queue.delayed.fetch_sub(1, Ordering::Relaxed);
                    let mut entry = entry;
                    entry.job.status = JobStatus::Waiting;
                    queue.pending.lock().await.push(entry);
                    queue.notify.notify_one();
                });
            }
            Err(err) => {
                queue.metrics.record_failure(duration_ms);
                error!(
                    queue = %queue.name,
                    job_id = %entry.job.id,
                    attempts = entry.job.attempts_made,
                    retryable = err.is_retryable(),
                    error = %err,
                    "job permanently failed"
                );
                entry.job.status = JobStatus::Failed;
                let dead = DeadLetter {
                    job: entry.job.clone(),
                    error: err.to_string(),
                    failed_at: Utc::now(),
                };
                if let Some(store) = &queue.store {
                    if let Err(e) = store.insert_dead_letter(&dead).await {
                        warn!(queue = %queue.name, error = %e, "dead-letter persistence failed");
                    }
                }
                queue.dead_letters.lock().await.push(dead);
                if let Some(done) = entry.done.take() {
                    let _ = done.send(Err(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use std::sync::atomic::AtomicU32;

    struct AlwaysFails {
        attempts: Arc<AtomicU32>,
        error: JobError,
    }

    #[async_trait]
    impl JobHandler for AlwaysFails {
        async fn handle(&self, _job: &Job) -> JobResult {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(self.error.clone())
        }
    }

    struct Echo;

    #[async_trait]
    impl JobHandler for Echo {
        async fn handle(&self, job: &Job) -> JobResult {
            Ok(job.payload.clone())
        }
    }

    fn test_config() -> QueueConfig {
        QueueConfig {
            concurrency: 1,
            max_attempts: 3,
            backoff_base_ms: 2000,
            backoff_cap_ms: 30_000,
        }
    }

    #[tokio::test]
    async fn test_enqueue_completes_and_returns_payload() {
        let queue = JobQueue::new(test_config());
        queue.register("echo", Arc::new(Echo)).await;

        let ticket = queue
            .enqueue("echo", serde_json::json!({"x": 1}), JobPriority::Normal)
            .await
            .unwrap();
        let value = ticket.result().await.unwrap();
        assert_eq!(value["x"], 1);

        let status = queue.status("echo").await.unwrap();
        assert_eq!(status.completed, 1);
        assert_eq!(status.failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_attempted_exactly_max_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let queue = JobQueue::new(test_config());
        queue
            .register(
                "flaky",
                Arc::new(AlwaysFails {
                    attempts: attempts.clone(),
                    error: JobError::network("connection reset"),
                }),
            )
            .await;

        let ticket = queue
            .enqueue("flaky", serde_json::json!({}), JobPriority::Normal)
            .await
            .unwrap();
        assert!(ticket.result().await.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        // give any stray retry a chance to fire; count must not move
        tokio::time::sleep(std::time::Duration::from_secs(120)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        let dead = queue.dead_letters("flaky").await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job.attempts_made, 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_on_first_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let queue = JobQueue::new(test_config());
        queue
            .register(
                "strict",
                Arc::new(AlwaysFails {
                    attempts: attempts.clone(),
                    error: JobError::invalid_input("malformed payload"),
                }),
            )
            .await;

        let ticket = queue
            .enqueue("strict", serde_json::json!({}), JobPriority::Normal)
            .await
            .unwrap();
        assert!(ticket.result().await.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(queue.dead_letters("strict").await.len(), 1);
    }

    #[tokio::test]
    async fn test_metrics_track_mean_duration() {
        let queue = JobQueue::new(test_config());
        queue.register("echo", Arc::new(Echo)).await;

        for i in 0..4 {
            let ticket = queue
                .enqueue("echo", serde_json::json!({ "i": i }), JobPriority::Normal)
                .await
                .unwrap();
            ticket.result().await.unwrap();
        }

        let metrics = queue.metrics("echo").await.unwrap();
        assert_eq!(metrics.succeeded, 4);
        assert_eq!(metrics.failed, 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_workers() {
        let queue = JobQueue::new(test_config());
        queue.register("echo", Arc::new(Echo)).await;
        queue.shutdown().await;

        // enqueue after shutdown: ticket never resolves with a value
        let ticket = queue
            .enqueue("echo", serde_json::json!({}), JobPriority::Normal)
            .await
            .unwrap();
        let res = tokio::time::timeout(std::time::Duration::from_millis(50), ticket.result()).await;
        assert!(res.is_err(), "no worker should pick the job up");
    }
}
