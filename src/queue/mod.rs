pub mod job;
pub mod memory_queue;
pub mod redis_queue;

pub use job::{retry_backoff, Job, JobKind, JobStatus, QueueStats};
pub use memory_queue::InMemoryQueue;
pub use redis_queue::RedisQueue;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppResult;

/// Job queue trait for abstracting queue backends.
/// Delivery is at-least-once: a job stays in the processing set until it is
/// completed or failed, and stalled entries are handed out again.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Push a job; jobs whose `run_at` lies in the future are held back
    async fn enqueue(&self, job: Job) -> AppResult<Uuid>;

    /// Pop the next due job (blocking up to `timeout`)
    async fn dequeue(&self, timeout: Duration) -> AppResult<Option<Job>>;

    /// Get job by ID
    async fn get_job(&self, job_id: Uuid) -> AppResult<Option<Job>>;

    /// Mark a running job completed
    async fn complete_job(&self, job_id: Uuid) -> AppResult<()>;

    /// Record a failed attempt; schedules a retry with backoff or moves the
    /// job to the dead set. Returns the resulting status.
    async fn fail_job(&self, job_id: Uuid, error: String, retryable: bool)
        -> AppResult<JobStatus>;

    /// Queue counters
    async fn stats(&self) -> AppResult<QueueStats>;

    /// Most recent dead jobs, newest first
    async fn list_dead(&self, limit: u64) -> AppResult<Vec<Job>>;

    /// Put a dead or failed job back on the queue with fresh attempts
    async fn requeue(&self, job_id: Uuid) -> AppResult<()>;

    /// Hand out again jobs that have been running longer than `visibility`.
    /// Returns how many were recovered.
    async fn recover_stalled(&self, visibility: Duration) -> AppResult<u64>;
}
