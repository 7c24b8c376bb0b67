use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use tempfile::TempDir;
use uuid::Uuid;

use dockyard::build_router;
use dockyard::config::{Config, ProbeMode};
use dockyard::models::Deployment;
use dockyard::queue::{InMemoryQueue, Job, JobKind};
use dockyard::repositories::{DeploymentRepository, InMemoryStore};
use dockyard::runtime::InMemoryRuntime;
use dockyard::services::lease::InMemoryLease;
use dockyard::services::probe::StaticProbe;
use dockyard::services::publisher::InMemoryPublisher;
use dockyard::services::{JobExecutor, Monitor, TickSummary};
use dockyard::state::{AppState, StateParts};

/// Test configuration
pub fn test_config() -> Config {
    Config {
        database_url: String::new(),
        redis_url: String::new(),
        host: "127.0.0.1".to_string(),
        port: 0,
        docker_host: "tcp://127.0.0.1:2375".to_string(),
        runner_network: "dockyard_runner".to_string(),
        runner_image_prefix: "runner-".to_string(),
        runner_port: 8000,
        default_cpus: 0.5,
        default_memory_mb: 512,
        log_driver: None,
        loki_url: String::new(),
        engine_concurrency: 4,
        stop_grace: Duration::from_secs(1),
        deploy_domain: "apps.test".to_string(),
        url_scheme: "https".to_string(),
        // Replaced with a per-test temp dir
        routing_config_dir: std::env::temp_dir(),
        monitor_interval: Duration::from_millis(10),
        probe_timeout: Duration::from_millis(50),
        probe_mode: ProbeMode::Tcp,
        probe_concurrency: 4,
        deployment_timeout: Duration::from_secs(60),
        handoff_timeout: Duration::from_secs(60),
        start_timeout: Duration::from_secs(600),
        leader_lease_ttl: Duration::from_secs(5),
        drain_grace: Duration::ZERO,
        retain_previous: true,
        cleanup_interval: Duration::from_secs(60),
        inactivity_window: Duration::from_secs(5 * 24 * 3600),
        worker_concurrency: 2,
        job_max_attempts: 3,
        job_visibility_timeout: Duration::from_secs(60),
    }
}

/// Test application wrapper: the engine wired to in-memory backends
pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    pub store: InMemoryStore,
    pub queue: InMemoryQueue,
    pub runtime: InMemoryRuntime,
    pub probe: StaticProbe,
    pub publisher: InMemoryPublisher,
    pub executor: JobExecutor,
    pub routing_dir: TempDir,
}

impl TestApp {
    /// Create a new test application
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test application with adjusted configuration
    pub async fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let routing_dir = TempDir::new().expect("Failed to create routing dir");

        let mut config = test_config();
        config.routing_config_dir = routing_dir.path().to_path_buf();
        adjust(&mut config);

        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new();
        let runtime = InMemoryRuntime::new();
        let probe = StaticProbe::new();
        let publisher = InMemoryPublisher::new();

        let state = AppState::from_parts(
            config,
            StateParts {
                store: Arc::new(store.clone()),
                job_queue: Arc::new(queue.clone()),
                runtime: Arc::new(runtime.clone()),
                probe: Arc::new(probe.clone()),
                publisher: Arc::new(publisher.clone()),
                lease: Arc::new(InMemoryLease::new()),
            },
        );

        let router = build_router(state.clone());
        let server = TestServer::new(router).expect("Failed to create test server");
        let executor = JobExecutor::new(state.clone());

        Self {
            server,
            state,
            store,
            queue,
            runtime,
            probe,
            publisher,
            executor,
            routing_dir,
        }
    }

    /// Run every due job until the queue is empty
    pub async fn drain(&self) -> usize {
        self.executor.drain().await.expect("Failed to drain queue")
    }

    /// Make delayed jobs due, then drain
    pub async fn drain_all(&self) -> usize {
        self.queue.fast_forward().await;
        self.drain().await
    }

    pub async fn tick(&self) -> TickSummary {
        Monitor::tick(&self.state).await.expect("Monitor tick failed")
    }

    /// Drive a pending deployment through start, one monitor tick and the
    /// resulting hand-off job
    pub async fn settle(&self) -> TickSummary {
        self.drain().await;
        let summary = self.tick().await;
        self.drain().await;
        summary
    }

    pub async fn deployment(&self, id: Uuid) -> Deployment {
        self.store
            .find_deployment(id)
            .await
            .expect("Failed to load deployment")
            .expect("Deployment not found")
    }

    /// Jobs of one type, oldest first
    pub async fn jobs_of(&self, job_type: &str) -> Vec<Job> {
        self.queue
            .all_jobs()
            .await
            .into_iter()
            .filter(|job| job.kind.as_str() == job_type)
            .collect()
    }

    pub async fn enqueue(&self, kind: JobKind) -> Uuid {
        self.state
            .job_queue
            .enqueue(Job::new(kind))
            .await
            .expect("Failed to enqueue job")
    }

    pub async fn routing_file(&self, project_id: Uuid) -> Option<String> {
        self.state
            .routing
            .read(project_id)
            .await
            .expect("Failed to read routing file")
    }
}
