use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::FailureReason;

/// Upper bound for the retry backoff
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Job status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting in queue (or scheduled for later)
    Pending,
    /// Job is currently being processed
    Running,
    /// Job completed successfully
    Completed,
    /// Job failed and is scheduled for another attempt
    Failed,
    /// Job failed permanently (max attempts exceeded or not retryable)
    Dead,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Dead)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Dead => "dead",
        }
    }
}

/// Closed set of jobs the worker knows how to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    DeployStart { deployment_id: Uuid },
    DeployFinalize { deployment_id: Uuid },
    DeployFail { deployment_id: Uuid, reason: FailureReason },
    CleanupSweep,
    CleanupProject { project_id: Uuid },
    RoutingRegenerate { project_id: Uuid },
    ProjectReactivate { project_id: Uuid },
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeployStart { .. } => "deploy_start",
            Self::DeployFinalize { .. } => "deploy_finalize",
            Self::DeployFail { .. } => "deploy_fail",
            Self::CleanupSweep => "cleanup_sweep",
            Self::CleanupProject { .. } => "cleanup_project",
            Self::RoutingRegenerate { .. } => "routing_regenerate",
            Self::ProjectReactivate { .. } => "project_reactivate",
        }
    }

    pub fn deployment_id(&self) -> Option<Uuid> {
        match self {
            Self::DeployStart { deployment_id }
            | Self::DeployFinalize { deployment_id }
            | Self::DeployFail { deployment_id, .. } => Some(*deployment_id),
            _ => None,
        }
    }

    pub fn project_id(&self) -> Option<Uuid> {
        match self {
            Self::CleanupProject { project_id }
            | Self::RoutingRegenerate { project_id }
            | Self::ProjectReactivate { project_id } => Some(*project_id),
            _ => None,
        }
    }
}

/// Job submitted to the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier
    pub id: Uuid,

    /// What to run
    pub kind: JobKind,

    /// Current status
    pub status: JobStatus,

    /// 1-based number of the current (or last) attempt
    pub attempt: u32,
    pub max_attempts: u32,

    /// Not runnable before this instant
    #[serde(with = "time::serde::rfc3339")]
    pub run_at: OffsetDateTime,

    /// Timestamps
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,

    /// Error message of the last failed attempt
    pub error_message: Option<String>,
}

impl Job {
    pub fn new(kind: JobKind) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            kind,
            status: JobStatus::Pending,
            attempt: 0,
            max_attempts: 3,
            run_at: now,
            created_at: now,
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Schedule the job `delay` from now
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.run_at = OffsetDateTime::now_utc() + delay;
        self
    }

    pub fn is_due(&self, now: OffsetDateTime) -> bool {
        self.run_at <= now
    }

    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Exponential backoff after the given (1-based) attempt
pub fn retry_backoff(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    Duration::from_secs(2u64 << exp).min(MAX_BACKOFF)
}

/// Queue counters for the stats endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub delayed: u64,
    pub processing: u64,
    pub dead: u64,
}
