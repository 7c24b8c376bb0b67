use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager as RedisConnectionManager;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::Deployment;

/// Streams are trimmed to roughly this many entries
const STREAM_MAX_LEN: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DeploymentCreated,
    DeploymentStatusUpdate,
    DeploymentRollback,
    RoutingError,
    ProjectDeactivated,
    ProjectReactivated,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeploymentCreated => "deployment_created",
            Self::DeploymentStatusUpdate => "deployment_status_update",
            Self::DeploymentRollback => "deployment_rollback",
            Self::RoutingError => "routing_error",
            Self::ProjectDeactivated => "project_deactivated",
            Self::ProjectReactivated => "project_reactivated",
        }
    }
}

/// Lifecycle event pushed to the API layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Consumers dedup on this
    pub event_id: Uuid,
    pub event_type: EventType,
    pub project_id: Uuid,
    pub deployment_id: Option<Uuid>,
    /// `pending`, `in_progress`, or the conclusion once completed
    pub deployment_status: Option<String>,
    pub message: Option<String>,
    pub timestamp: OffsetDateTime,
}

impl StatusEvent {
    pub fn project(event_type: EventType, project_id: Uuid) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            project_id,
            deployment_id: None,
            deployment_status: None,
            message: None,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn deployment(event_type: EventType, deployment: &Deployment) -> Self {
        let status = match deployment.conclusion {
            Some(conclusion) => conclusion.as_str(),
            None => deployment.status.as_str(),
        };

        Self {
            deployment_id: Some(deployment.id),
            deployment_status: Some(status.to_string()),
            ..Self::project(event_type, deployment.project_id)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Stream keys this event is written to
    pub fn streams(&self) -> Vec<String> {
        let mut streams = vec![format!("stream:project:{}:updates", self.project_id)];
        if let Some(deployment_id) = self.deployment_id {
            streams.push(format!(
                "stream:project:{}:deployment:{}:status",
                self.project_id, deployment_id
            ));
        }
        streams
    }

    /// Flat field list for XADD
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("event_id", self.event_id.to_string()),
            ("event_type", self.event_type.as_str().to_string()),
            ("project_id", self.project_id.to_string()),
            (
                "timestamp",
                self.timestamp
                    .format(&Rfc3339)
                    .unwrap_or_else(|_| self.timestamp.unix_timestamp().to_string()),
            ),
        ];
        if let Some(deployment_id) = self.deployment_id {
            fields.push(("deployment_id", deployment_id.to_string()));
        }
        if let Some(status) = &self.deployment_status {
            fields.push(("deployment_status", status.clone()));
        }
        if let Some(message) = &self.message {
            fields.push(("message", message.clone()));
        }
        fields
    }
}

#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(&self, event: StatusEvent) -> AppResult<()>;
}

/// Publishes to Redis streams with approximate trimming
#[derive(Clone)]
pub struct RedisPublisher {
    conn: RedisConnectionManager,
}

impl RedisPublisher {
    pub fn new(conn: RedisConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl StatusPublisher for RedisPublisher {
    async fn publish(&self, event: StatusEvent) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let fields = event.fields();

        for stream in event.streams() {
            let mut cmd = redis::cmd("XADD");
            cmd.arg(&stream)
                .arg("MAXLEN")
                .arg("~")
                .arg(STREAM_MAX_LEN)
                .arg("*");
            for (field, value) in &fields {
                cmd.arg(*field).arg(value);
            }

            let _: String = cmd
                .query_async(&mut conn)
                .await
                .map_err(|e| AppError::Queue(format!("Failed to publish event: {}", e)))?;
        }

        tracing::debug!(
            event_id = %event.event_id,
            event_type = event.event_type.as_str(),
            project_id = %event.project_id,
            "Event published"
        );

        Ok(())
    }
}

/// Records events in memory, for tests
#[derive(Clone, Default)]
pub struct InMemoryPublisher {
    events: Arc<Mutex<Vec<StatusEvent>>>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().await.clone()
    }

    pub async fn events_of(&self, event_type: EventType) -> Vec<StatusEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StatusPublisher for InMemoryPublisher {
    async fn publish(&self, event: StatusEvent) -> AppResult<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}
