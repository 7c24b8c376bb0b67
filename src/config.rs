use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How the Monitor decides that a runner is ready to receive traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// Any HTTP response on `/` counts as ready
    Http,
    /// An accepted TCP connection counts as ready
    Tcp,
}

impl FromStr for ProbeMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "tcp" => Ok(Self::Tcp),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,
    pub redis_url: String,

    // Server
    pub host: String,
    pub port: u16,

    // Container engine
    pub docker_host: String,
    pub runner_network: String,
    pub runner_image_prefix: String,
    pub runner_port: u16,
    pub default_cpus: f64,
    pub default_memory_mb: i64,
    pub log_driver: Option<String>,
    pub loki_url: String,
    pub engine_concurrency: usize,
    pub stop_grace: Duration,

    // Routing
    pub deploy_domain: String,
    pub url_scheme: String,
    pub routing_config_dir: PathBuf,

    // Monitor
    pub monitor_interval: Duration,
    pub probe_timeout: Duration,
    pub probe_mode: ProbeMode,
    pub probe_concurrency: usize,
    pub deployment_timeout: Duration,
    pub handoff_timeout: Duration,
    /// How long a deployment may sit in `pending` before the sweep fails it
    pub start_timeout: Duration,
    pub leader_lease_ttl: Duration,

    // Cleanup
    pub drain_grace: Duration,
    pub retain_previous: bool,
    pub cleanup_interval: Duration,
    pub inactivity_window: Duration,

    // Worker
    pub worker_concurrency: usize,
    pub job_max_attempts: u32,
    pub job_visibility_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if exists

        let log_driver = env::var("LOG_DRIVER").unwrap_or_else(|_| "loki".to_string());

        Ok(Self {
            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            redis_url: env::var("REDIS_URL").map_err(|_| ConfigError::Missing("REDIS_URL"))?,

            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_var("PORT", "3000")?,

            // Container engine
            docker_host: env::var("DOCKER_HOST")
                .unwrap_or_else(|_| "tcp://docker-proxy:2375".to_string()),
            runner_network: env::var("RUNNER_NETWORK")
                .unwrap_or_else(|_| "dockyard_runner".to_string()),
            runner_image_prefix: env::var("RUNNER_IMAGE_PREFIX")
                .unwrap_or_else(|_| "runner-".to_string()),
            runner_port: parse_var("RUNNER_PORT", "8000")?,
            default_cpus: parse_var("DEFAULT_CPUS", "0.5")?,
            default_memory_mb: parse_var("DEFAULT_MEMORY_MB", "2048")?,
            log_driver: match log_driver.as_str() {
                "" | "none" => None,
                _ => Some(log_driver),
            },
            loki_url: env::var("LOKI_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:3100/loki/api/v1/push".to_string()),
            engine_concurrency: parse_var("ENGINE_CONCURRENCY", "8")?,
            stop_grace: secs_var("STOP_GRACE_SECS", "10")?,

            // Routing
            deploy_domain: env::var("DEPLOY_DOMAIN").unwrap_or_else(|_| "localhost".to_string()),
            url_scheme: env::var("URL_SCHEME").unwrap_or_else(|_| "https".to_string()),
            routing_config_dir: PathBuf::from(
                env::var("ROUTING_CONFIG_DIR").unwrap_or_else(|_| "/data/traefik".to_string()),
            ),

            // Monitor
            monitor_interval: secs_var("MONITOR_INTERVAL_SECS", "2")?,
            probe_timeout: secs_var("PROBE_TIMEOUT_SECS", "5")?,
            probe_mode: parse_var("PROBE_MODE", "http")?,
            probe_concurrency: parse_var("PROBE_CONCURRENCY", "16")?,
            deployment_timeout: secs_var("DEPLOYMENT_TIMEOUT_SECS", "300")?,
            handoff_timeout: secs_var("HANDOFF_TIMEOUT_SECS", "320")?,
            start_timeout: secs_var("START_TIMEOUT_SECS", "1800")?,
            leader_lease_ttl: secs_var("LEADER_LEASE_TTL_SECS", "10")?,

            // Cleanup
            drain_grace: secs_var("DRAIN_GRACE_SECS", "60")?,
            retain_previous: parse_var("RETAIN_PREVIOUS", "true")?,
            cleanup_interval: secs_var("CLEANUP_INTERVAL_SECS", "3600")?,
            inactivity_window: Duration::from_secs(
                parse_var::<u64>("INACTIVITY_DAYS", "5")? * 24 * 3600,
            ),

            // Worker
            worker_concurrency: parse_var("WORKER_CONCURRENCY", "8")?,
            job_max_attempts: parse_var("JOB_MAX_ATTEMPTS", "3")?,
            job_visibility_timeout: secs_var("JOB_VISIBILITY_TIMEOUT_SECS", "320")?,
        })
    }

    /// Get server address as "host:port"
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Docker Engine API base URL (`tcp://` hosts are spoken to over plain HTTP)
    pub fn docker_api_url(&self) -> String {
        match self.docker_host.strip_prefix("tcp://") {
            Some(rest) => format!("http://{}", rest.trim_end_matches('/')),
            None => self.docker_host.trim_end_matches('/').to_string(),
        }
    }

    pub fn is_https(&self) -> bool {
        self.url_scheme == "https"
    }
}

fn parse_var<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::Invalid(key))
}

fn secs_var(key: &'static str, default: &str) -> Result<Duration, ConfigError> {
    parse_var::<u64>(key, default).map(Duration::from_secs)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid environment variable: {0}")]
    Invalid(&'static str),
}

/// Fast, local settings for unit tests
#[cfg(test)]
pub(crate) fn test_config() -> Config {
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
        inactivity_window: Duration::from_secs(3600),
        worker_concurrency: 2,
        job_max_attempts: 3,
        job_visibility_timeout: Duration::from_secs(60),
    }
}
