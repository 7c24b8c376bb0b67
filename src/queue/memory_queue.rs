use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::queue::{retry_backoff, Job, JobQueue, JobStatus, QueueStats};

/// In-memory queue for testing
#[derive(Clone)]
pub struct InMemoryQueue {
    inner: Arc<Mutex<InMemoryQueueInner>>,
    notify: Arc<Notify>,
}

struct InMemoryQueueInner {
    queue: VecDeque<Uuid>,
    processing: Vec<Uuid>,
    delayed: Vec<Uuid>,
    dead: Vec<Uuid>,
    jobs: HashMap<Uuid, Job>,
}

impl InMemoryQueueInner {
    fn promote_due(&mut self) {
        let now = OffsetDateTime::now_utc();
        let jobs = &self.jobs;
        let (due, waiting): (Vec<Uuid>, Vec<Uuid>) = self
            .delayed
            .iter()
            .partition(|id| jobs.get(*id).is_some_and(|job| job.is_due(now)));
        self.delayed = waiting;
        self.queue.extend(due);
    }

    fn pop(&mut self) -> Option<Job> {
        self.promote_due();
        let job_id = self.queue.pop_front()?;
        let job = self.jobs.get_mut(&job_id)?;
        job.status = JobStatus::Running;
        job.attempt += 1;
        job.started_at = Some(OffsetDateTime::now_utc());
        self.processing.push(job_id);
        Some(job.clone())
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(InMemoryQueueInner {
                queue: VecDeque::new(),
                processing: Vec::new(),
                delayed: Vec::new(),
                dead: Vec::new(),
                jobs: HashMap::new(),
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Every job ever enqueued, oldest first
    pub async fn all_jobs(&self) -> Vec<Job> {
        let inner = self.inner.lock().await;
        let mut jobs: Vec<Job> = inner.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    /// Make every delayed job due now
    pub async fn fast_forward(&self) {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc();
        let delayed = inner.delayed.clone();
        for job_id in delayed {
            if let Some(job) = inner.jobs.get_mut(&job_id) {
                job.run_at = now;
            }
        }
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn enqueue(&self, job: Job) -> AppResult<Uuid> {
        let job_id = job.id;
        let due = job.is_due(OffsetDateTime::now_utc());
        let mut inner = self.inner.lock().await;
        inner.jobs.insert(job_id, job);
        if due {
            inner.queue.push_back(job_id);
        } else {
            inner.delayed.push(job_id);
        }
        drop(inner);
        self.notify.notify_one();
        Ok(job_id)
    }

    async fn dequeue(&self, timeout: Duration) -> AppResult<Option<Job>> {
        // Try to get a job immediately
        if let Some(job) = self.inner.lock().await.pop() {
            return Ok(Some(job));
        }

        // Wait for notification with timeout
        tokio::select! {
            _ = tokio::time::sleep(timeout) => Ok(None),
            _ = self.notify.notified() => Ok(self.inner.lock().await.pop()),
        }
    }

    async fn get_job(&self, job_id: Uuid) -> AppResult<Option<Job>> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.get(&job_id).cloned())
    }

    async fn complete_job(&self, job_id: Uuid) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        inner.processing.retain(|id| *id != job_id);
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::NotFound("Job".to_string()))?;
        job.status = JobStatus::Completed;
        job.completed_at = Some(OffsetDateTime::now_utc());
        Ok(())
    }

    async fn fail_job(
        &self,
        job_id: Uuid,
        error: String,
        retryable: bool,
    ) -> AppResult<JobStatus> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.processing.retain(|id| *id != job_id);
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::NotFound("Job".to_string()))?;

        let now = OffsetDateTime::now_utc();
        job.error_message = Some(error);

        let status = if retryable && job.attempt < job.max_attempts {
            job.status = JobStatus::Failed;
            job.run_at = now + retry_backoff(job.attempt);
            inner.delayed.push(job_id);
            JobStatus::Failed
        } else {
            job.status = JobStatus::Dead;
            job.completed_at = Some(now);
            inner.dead.push(job_id);
            JobStatus::Dead
        };
        Ok(status)
    }

    async fn stats(&self) -> AppResult<QueueStats> {
        let inner = self.inner.lock().await;
        Ok(QueueStats {
            pending: inner.queue.len() as u64,
            delayed: inner.delayed.len() as u64,
            processing: inner.processing.len() as u64,
            dead: inner.dead.len() as u64,
        })
    }

    async fn list_dead(&self, limit: u64) -> AppResult<Vec<Job>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .dead
            .iter()
            .rev()
            .take(limit as usize)
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect())
    }

    async fn requeue(&self, job_id: Uuid) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::NotFound("Job".to_string()))?;

        if !matches!(job.status, JobStatus::Dead | JobStatus::Failed) {
            return Err(AppError::Validation(
                "Only failed or dead jobs can be requeued".to_string(),
            ));
        }

        job.status = JobStatus::Pending;
        job.attempt = 0;
        job.run_at = OffsetDateTime::now_utc();
        job.started_at = None;
        job.completed_at = None;
        job.error_message = None;

        inner.dead.retain(|id| *id != job_id);
        inner.delayed.retain(|id| *id != job_id);
        inner.queue.push_back(job_id);
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    async fn recover_stalled(&self, visibility: Duration) -> AppResult<u64> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let now = OffsetDateTime::now_utc();
        let processing = std::mem::take(&mut inner.processing);
        let mut recovered = 0;

        for job_id in processing {
            let Some(job) = inner.jobs.get_mut(&job_id) else {
                continue;
            };
            let stalled = job.status == JobStatus::Running
                && job.started_at.is_some_and(|started| now - started >= visibility);
            if !stalled {
                inner.processing.push(job_id);
                continue;
            }

            recovered += 1;
            if job.is_final_attempt() {
                job.status = JobStatus::Dead;
                job.completed_at = Some(now);
                inner.dead.push(job_id);
            } else {
                job.status = JobStatus::Pending;
                job.started_at = None;
                inner.queue.push_back(job_id);
            }
        }

        Ok(recovered)
    }
}
