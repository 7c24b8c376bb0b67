use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager as RedisConnectionManager;
use redis::AsyncCommands;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::queue::{retry_backoff, Job, JobQueue, JobStatus, QueueStats};

/// Redis keys structure:
/// - dockyard:jobs:queue        - List of runnable job ids (FIFO)
/// - dockyard:jobs:processing   - List of job ids handed to a worker
/// - dockyard:jobs:delayed      - Sorted set of job ids by run_at (ms)
/// - dockyard:jobs:dead         - Sorted set of dead job ids by death time
/// - dockyard:jobs:{id}         - String for job data (JSON)
const QUEUE_KEY: &str = "dockyard:jobs:queue";
const PROCESSING_KEY: &str = "dockyard:jobs:processing";
const DELAYED_KEY: &str = "dockyard:jobs:delayed";
const DEAD_KEY: &str = "dockyard:jobs:dead";
const JOB_PREFIX: &str = "dockyard:jobs:";

/// Completed job documents expire after a week
const COMPLETED_TTL_SECS: i64 = 7 * 24 * 3600;

/// Redis-backed job queue implementation
#[derive(Clone)]
pub struct RedisQueue {
    conn: RedisConnectionManager,
}

impl RedisQueue {
    pub fn new(conn: RedisConnectionManager) -> Self {
        Self { conn }
    }

    fn job_key(id: Uuid) -> String {
        format!("{}{}", JOB_PREFIX, id)
    }

    fn unix_ms(at: OffsetDateTime) -> i64 {
        (at.unix_timestamp_nanos() / 1_000_000) as i64
    }

    async fn save_job(&self, job: &Job) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let job_json = serde_json::to_string(job)?;

        let _: () = conn.set(Self::job_key(job.id), &job_json).await?;

        Ok(())
    }

    async fn load_job(&self, job_id: Uuid) -> AppResult<Job> {
        self.get_job(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Job".to_string()))
    }

    /// Move due delayed jobs onto the runnable list. ZREM decides which
    /// worker wins a given id.
    async fn promote_due(&self) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let now = Self::unix_ms(OffsetDateTime::now_utc());

        let due: Vec<String> = conn.zrangebyscore(DELAYED_KEY, "-inf", now).await?;
        for job_id in due {
            let removed: i64 = conn.zrem(DELAYED_KEY, &job_id).await?;
            if removed == 1 {
                let _: () = conn.rpush(QUEUE_KEY, &job_id).await?;
            }
        }

        Ok(())
    }

    async fn schedule(&self, job: &Job) -> AppResult<()> {
        let mut conn = self.conn.clone();
        if job.is_due(OffsetDateTime::now_utc()) {
            let _: () = conn.rpush(QUEUE_KEY, job.id.to_string()).await?;
        } else {
            let _: () = conn
                .zadd(DELAYED_KEY, job.id.to_string(), Self::unix_ms(job.run_at))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, job: Job) -> AppResult<Uuid> {
        let job_id = job.id;

        // Store job data before it becomes visible
        self.save_job(&job).await?;
        self.schedule(&job).await?;

        tracing::info!(job_id = %job_id, job_type = job.kind.as_str(), "Job enqueued");

        Ok(job_id)
    }

    async fn dequeue(&self, timeout: Duration) -> AppResult<Option<Job>> {
        self.promote_due().await?;

        let mut conn = self.conn.clone();

        // Blocking move into the processing list
        let job_id: Option<String> = redis::cmd("BLMOVE")
            .arg(QUEUE_KEY)
            .arg(PROCESSING_KEY)
            .arg("LEFT")
            .arg("RIGHT")
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;

        let Some(job_id_str) = job_id else {
            return Ok(None);
        };

        let job_id = Uuid::parse_str(&job_id_str)
            .map_err(|e| AppError::Internal(format!("Invalid UUID: {}", e)))?;

        match self.get_job(job_id).await? {
            Some(mut job) => {
                job.status = JobStatus::Running;
                job.attempt += 1;
                job.started_at = Some(OffsetDateTime::now_utc());
                self.save_job(&job).await?;

                tracing::info!(job_id = %job_id, attempt = job.attempt, "Job dequeued and started");
                Ok(Some(job))
            }
            None => {
                // Document gone; drop the dangling id
                let _: () = conn.lrem(PROCESSING_KEY, 1, &job_id_str).await?;
                Ok(None)
            }
        }
    }

    async fn get_job(&self, job_id: Uuid) -> AppResult<Option<Job>> {
        let mut conn = self.conn.clone();

        let job_json: Option<String> = conn.get(Self::job_key(job_id)).await?;

        match job_json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn complete_job(&self, job_id: Uuid) -> AppResult<()> {
        let mut job = self.load_job(job_id).await?;

        job.status = JobStatus::Completed;
        job.completed_at = Some(OffsetDateTime::now_utc());
        self.save_job(&job).await?;

        let mut conn = self.conn.clone();
        let _: () = conn.lrem(PROCESSING_KEY, 1, job_id.to_string()).await?;
        let _: () = conn.expire(Self::job_key(job_id), COMPLETED_TTL_SECS).await?;

        tracing::info!(job_id = %job_id, job_type = job.kind.as_str(), "Job completed");

        Ok(())
    }

    async fn fail_job(
        &self,
        job_id: Uuid,
        error: String,
        retryable: bool,
    ) -> AppResult<JobStatus> {
        let mut job = self.load_job(job_id).await?;
        let now = OffsetDateTime::now_utc();

        job.error_message = Some(error.clone());

        let mut conn = self.conn.clone();
        let _: () = conn.lrem(PROCESSING_KEY, 1, job_id.to_string()).await?;

        if retryable && job.attempt < job.max_attempts {
            job.status = JobStatus::Failed;
            job.run_at = now + retry_backoff(job.attempt);
            self.save_job(&job).await?;
            let _: () = conn
                .zadd(DELAYED_KEY, job_id.to_string(), Self::unix_ms(job.run_at))
                .await?;
        } else {
            job.status = JobStatus::Dead;
            job.completed_at = Some(now);
            self.save_job(&job).await?;
            let _: () = conn
                .zadd(DEAD_KEY, job_id.to_string(), Self::unix_ms(now))
                .await?;
        }

        tracing::warn!(
            job_id = %job_id,
            job_type = job.kind.as_str(),
            status = ?job.status,
            attempt = job.attempt,
            error = %error,
            "Job failed"
        );

        Ok(job.status)
    }

    async fn stats(&self) -> AppResult<QueueStats> {
        let mut conn = self.conn.clone();

        Ok(QueueStats {
            pending: conn.llen(QUEUE_KEY).await?,
            delayed: conn.zcard(DELAYED_KEY).await?,
            processing: conn.llen(PROCESSING_KEY).await?,
            dead: conn.zcard(DEAD_KEY).await?,
        })
    }

    async fn list_dead(&self, limit: u64) -> AppResult<Vec<Job>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let job_ids: Vec<String> = conn.zrevrange(DEAD_KEY, 0, (limit - 1) as isize).await?;

        let mut jobs = Vec::new();
        for job_id_str in job_ids {
            if let Ok(job_id) = Uuid::parse_str(&job_id_str) {
                if let Some(job) = self.get_job(job_id).await? {
                    jobs.push(job);
                }
            }
        }

        Ok(jobs)
    }

    async fn requeue(&self, job_id: Uuid) -> AppResult<()> {
        let mut job = self.load_job(job_id).await?;

        if !matches!(job.status, JobStatus::Dead | JobStatus::Failed) {
            return Err(AppError::Validation(
                "Only failed or dead jobs can be requeued".to_string(),
            ));
        }

        let mut conn = self.conn.clone();
        let _: () = conn.zrem(DEAD_KEY, job_id.to_string()).await?;
        let _: () = conn.zrem(DELAYED_KEY, job_id.to_string()).await?;

        job.status = JobStatus::Pending;
        job.attempt = 0;
        job.run_at = OffsetDateTime::now_utc();
        job.started_at = None;
        job.completed_at = None;
        job.error_message = None;

        self.save_job(&job).await?;
        let _: () = conn.rpush(QUEUE_KEY, job_id.to_string()).await?;

        tracing::info!(job_id = %job_id, "Job requeued");

        Ok(())
    }

    async fn recover_stalled(&self, visibility: Duration) -> AppResult<u64> {
        let mut conn = self.conn.clone();
        let now = OffsetDateTime::now_utc();

        let in_flight: Vec<String> = conn.lrange(PROCESSING_KEY, 0, -1).await?;
        let mut recovered = 0;

        for job_id_str in in_flight {
            let Ok(job_id) = Uuid::parse_str(&job_id_str) else {
                let _: () = conn.lrem(PROCESSING_KEY, 1, &job_id_str).await?;
                continue;
            };

            let Some(mut job) = self.get_job(job_id).await? else {
                let _: () = conn.lrem(PROCESSING_KEY, 1, &job_id_str).await?;
                continue;
            };

            let stalled = job.status == JobStatus::Running
                && job.started_at.is_some_and(|started| now - started >= visibility);
            if !stalled {
                continue;
            }

            // Only the caller that removes the entry recovers it
            let removed: i64 = conn.lrem(PROCESSING_KEY, 1, &job_id_str).await?;
            if removed == 0 {
                continue;
            }

            job.error_message = Some("Job stalled past the visibility timeout".to_string());
            if job.is_final_attempt() {
                job.status = JobStatus::Dead;
                job.completed_at = Some(now);
                self.save_job(&job).await?;
                let _: () = conn.zadd(DEAD_KEY, &job_id_str, Self::unix_ms(now)).await?;
            } else {
                job.status = JobStatus::Pending;
                job.started_at = None;
                self.save_job(&job).await?;
                let _: () = conn.rpush(QUEUE_KEY, &job_id_str).await?;
            }

            tracing::warn!(job_id = %job_id, attempt = job.attempt, "Recovered stalled job");
            recovered += 1;
        }

        Ok(recovered)
    }
}
