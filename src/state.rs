use std::sync::Arc;

use redis::aio::ConnectionManager as RedisConnectionManager;
use sea_orm::{ConnectOptions, Database};
use sqlx::postgres::PgPool;

use crate::config::Config;
use crate::queue::{JobQueue, RedisQueue};
use crate::repositories::{PgStore, Store};
use crate::routing::RoutingWriter;
use crate::runtime::{ContainerRuntime, DockerRuntime};
use crate::services::lease::{LeaderLease, RedisLease};
use crate::services::probe::{probe_from_config, ReadinessProbe};
use crate::services::publisher::{RedisPublisher, StatusPublisher};

/// Application state shared by the control API, the worker and the monitor
#[derive(Clone)]
pub struct AppState {
    /// Projects, deployments, aliases and domains
    pub store: Arc<dyn Store>,
    /// Job queue between producers and the worker
    pub job_queue: Arc<dyn JobQueue>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub probe: Arc<dyn ReadinessProbe>,
    pub publisher: Arc<dyn StatusPublisher>,
    /// Monitor leader election
    pub lease: Arc<dyn LeaderLease>,
    pub routing: RoutingWriter,
    pub config: Config,
}

/// Collaborators for [`AppState::from_parts`]
pub struct StateParts {
    pub store: Arc<dyn Store>,
    pub job_queue: Arc<dyn JobQueue>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub probe: Arc<dyn ReadinessProbe>,
    pub publisher: Arc<dyn StatusPublisher>,
    pub lease: Arc<dyn LeaderLease>,
}

impl AppState {
    /// Create a new AppState by connecting to PostgreSQL, Redis and the
    /// container engine
    pub async fn new(config: Config) -> Result<Self, AppStateError> {
        // Connect to PostgreSQL with SQLx (for migrations)
        let pg_pool = PgPool::connect(&config.database_url)
            .await
            .map_err(|e| AppStateError::Postgres(e.to_string()))?;

        // Run migrations
        sqlx::migrate!("./migrations")
            .run(&pg_pool)
            .await
            .map_err(|e| AppStateError::Migration(e.to_string()))?;
        pg_pool.close().await;

        // Connect to PostgreSQL with SeaORM
        let mut opt = ConnectOptions::new(&config.database_url);
        opt.max_connections(100)
            .min_connections(5)
            .sqlx_logging(true);

        let db = Database::connect(opt)
            .await
            .map_err(|e| AppStateError::Postgres(e.to_string()))?;

        // Connect to Redis
        let redis_client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| AppStateError::Redis(e.to_string()))?;
        let redis = RedisConnectionManager::new(redis_client)
            .await
            .map_err(|e| AppStateError::Redis(e.to_string()))?;

        let runtime =
            DockerRuntime::new(&config).map_err(|e| AppStateError::Engine(e.to_string()))?;
        let probe = probe_from_config(&config).map_err(|e| AppStateError::Engine(e.to_string()))?;

        let parts = StateParts {
            store: Arc::new(PgStore::new(db)),
            job_queue: Arc::new(RedisQueue::new(redis.clone())),
            runtime: Arc::new(runtime),
            probe,
            publisher: Arc::new(RedisPublisher::new(redis.clone())),
            lease: Arc::new(RedisLease::new(redis)),
        };

        Ok(Self::from_parts(config, parts))
    }

    /// Assemble a state from explicit collaborators (in-memory backends in
    /// tests)
    pub fn from_parts(config: Config, parts: StateParts) -> Self {
        let routing = RoutingWriter::new(config.routing_config_dir.clone());
        Self {
            store: parts.store,
            job_queue: parts.job_queue,
            runtime: parts.runtime,
            probe: parts.probe,
            publisher: parts.publisher,
            lease: parts.lease,
            routing,
            config,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppStateError {
    #[error("PostgreSQL connection error: {0}")]
    Postgres(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Redis connection error: {0}")]
    Redis(String),

    #[error("Container engine setup error: {0}")]
    Engine(String),
}
