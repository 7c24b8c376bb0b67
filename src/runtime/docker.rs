use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::runtime::{
    ContainerInfo, ContainerRuntime, ContainerSpec, ContainerState, DEPLOYMENT_LABEL,
    MANAGED_LABEL,
};

const CPU_PERIOD: i64 = 100_000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Docker Engine API client. All calls share one semaphore so the engine is
/// never hit by more than `engine_concurrency` requests at a time.
#[derive(Clone)]
pub struct DockerRuntime {
    client: Client,
    base: Url,
    permits: Arc<Semaphore>,
}

// ============ Engine API payloads ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectResponse {
    id: String,
    name: String,
    state: InspectState,
    config: InspectConfig,
    network_settings: NetworkSettings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
    exit_code: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkSettings {
    #[serde(default)]
    networks: HashMap<String, EndpointSettings>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EndpointSettings {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedContainer {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    state: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    network_settings: NetworkSettings,
}

#[derive(Debug, Deserialize)]
struct EngineError {
    message: String,
}

impl NetworkSettings {
    fn first_address(&self) -> Option<String> {
        let mut names: Vec<&String> = self.networks.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| self.networks.get(name))
            .map(|endpoint| endpoint.ip_address.clone())
            .find(|ip| !ip.is_empty())
    }
}

impl From<InspectResponse> for ContainerInfo {
    fn from(r: InspectResponse) -> Self {
        let state = match r.state.status.as_str() {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "exited" => ContainerState::Exited {
                code: r.state.exit_code,
            },
            "dead" => ContainerState::Dead,
            _ => ContainerState::Other,
        };

        Self {
            id: r.id,
            name: r.name.trim_start_matches('/').to_string(),
            ip_address: r.network_settings.first_address(),
            state,
            labels: r.config.labels.unwrap_or_default(),
        }
    }
}

impl From<ListedContainer> for ContainerInfo {
    fn from(c: ListedContainer) -> Self {
        let state = match c.state.as_str() {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "exited" => ContainerState::Exited {
                code: parse_exit_code(&c.status).unwrap_or(-1),
            },
            "dead" => ContainerState::Dead,
            _ => ContainerState::Other,
        };

        Self {
            id: c.id,
            name: c
                .names
                .first()
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            ip_address: c.network_settings.first_address(),
            state,
            labels: c.labels.unwrap_or_default(),
        }
    }
}

/// Pull the exit code out of a list status like `Exited (86) 2 minutes ago`
fn parse_exit_code(status: &str) -> Option<i64> {
    let rest = status.strip_prefix("Exited (")?;
    let end = rest.find(')')?;
    rest[..end].parse().ok()
}

/// Create request body in Engine API shape
fn create_body(spec: &ContainerSpec) -> serde_json::Value {
    let env: Vec<String> = spec
        .env
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();

    let mut host_config = json!({
        "CpuQuota": (spec.cpus * CPU_PERIOD as f64) as i64,
        "CpuPeriod": CPU_PERIOD,
        "Memory": spec.memory_mb * 1024 * 1024,
        "SecurityOpt": ["no-new-privileges:true"],
    });
    if let Some(log) = &spec.log {
        host_config["LogConfig"] = json!({
            "Type": log.driver,
            "Config": log.options,
        });
    }

    let mut endpoints = serde_json::Map::new();
    endpoints.insert(spec.network.clone(), json!({}));

    json!({
        "Image": spec.image,
        "Cmd": spec.command,
        "Env": env,
        "WorkingDir": spec.working_dir,
        "Labels": spec.labels,
        "NetworkingConfig": { "EndpointsConfig": endpoints },
        "HostConfig": host_config,
    })
}

impl DockerRuntime {
    pub fn new(config: &Config) -> AppResult<Self> {
        Self::with_base_url(&config.docker_api_url(), config.engine_concurrency)
    }

    pub fn with_base_url(base_url: &str, concurrency: usize) -> AppResult<Self> {
        let base = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .map_err(|e| AppError::Internal(format!("Invalid engine URL {}: {}", base_url, e)))?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            client,
            base,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        })
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> AppResult<Url> {
        let mut url = self
            .base
            .join(path)
            .map_err(|e| AppError::Internal(format!("Invalid engine path {}: {}", path, e)))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url)
    }

    async fn send(&self, request: RequestBuilder) -> AppResult<Response> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AppError::Internal("Engine semaphore closed".to_string()))?;

        request
            .send()
            .await
            .map_err(|e| AppError::Runtime(format!("Engine request failed: {}", e)))
    }

    /// Turn a non-success response into an error, keeping the engine message
    async fn error_from(response: Response, action: &str) -> AppError {
        let status = response.status();
        let message = response
            .json::<EngineError>()
            .await
            .map(|e| e.message)
            .unwrap_or_else(|_| status.to_string());

        if status == StatusCode::BAD_REQUEST || status == StatusCode::NOT_FOUND {
            // Bad spec or unknown image; retrying does not help
            AppError::Validation(format!("{}: {}", action, message))
        } else {
            AppError::Runtime(format!("{} ({}): {}", action, status, message))
        }
    }

    async fn list(&self, labels: &[String]) -> AppResult<Vec<ContainerInfo>> {
        let filters = json!({ "label": labels }).to_string();
        let url = self.url("containers/json", &[("all", "true"), ("filters", filters.as_str())])?;
        let response = self.send(self.request(Method::GET, url)).await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response, "List containers").await);
        }

        let listed: Vec<ListedContainer> = response
            .json()
            .await
            .map_err(|e| AppError::Runtime(format!("Invalid list response: {}", e)))?;

        Ok(listed.into_iter().map(ContainerInfo::from).collect())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> AppResult<String> {
        let url = self.url("containers/create", &[("name", spec.name.as_str())])?;
        let response = self
            .send(self.request(Method::POST, url).json(&create_body(spec)))
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => {
                let created: CreateResponse = response
                    .json()
                    .await
                    .map_err(|e| AppError::Runtime(format!("Invalid create response: {}", e)))?;
                tracing::info!(container = %spec.name, container_id = %created.id, "Container created");
                Ok(created.id)
            }
            StatusCode::CONFLICT => {
                // Name taken: a previous attempt already created it
                let existing = self.inspect(&spec.name).await?.ok_or_else(|| {
                    AppError::Runtime(format!("Container {} conflicts but is missing", spec.name))
                })?;
                tracing::info!(container = %spec.name, container_id = %existing.id, "Reusing existing container");
                Ok(existing.id)
            }
            _ => Err(Self::error_from(response, "Create container").await),
        }
    }

    async fn start(&self, container_id: &str) -> AppResult<()> {
        let url = self.url(&format!("containers/{}/start", container_id), &[])?;
        let response = self.send(self.request(Method::POST, url)).await?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED => Ok(()),
            StatusCode::NOT_FOUND => Err(AppError::Runtime(format!(
                "Container {} disappeared before start",
                container_id
            ))),
            _ => Err(Self::error_from(response, "Start container").await),
        }
    }

    async fn stop(&self, container_id: &str, grace: Duration) -> AppResult<()> {
        let seconds = grace.as_secs().to_string();
        let url = self.url(&format!("containers/{}/stop", container_id), &[("t", seconds.as_str())])?;
        let response = self
            .send(
                self.request(Method::POST, url)
                    .timeout(REQUEST_TIMEOUT + grace),
            )
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED | StatusCode::NOT_FOUND => Ok(()),
            _ => Err(Self::error_from(response, "Stop container").await),
        }
    }

    async fn remove(&self, container_id: &str) -> AppResult<()> {
        let url = self.url(
            &format!("containers/{}", container_id),
            &[("force", "true"), ("v", "true")],
        )?;
        let response = self.send(self.request(Method::DELETE, url)).await?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(()),
            // Removal already in progress
            StatusCode::CONFLICT => Ok(()),
            _ => Err(Self::error_from(response, "Remove container").await),
        }
    }

    async fn inspect(&self, container_id: &str) -> AppResult<Option<ContainerInfo>> {
        let url = self.url(&format!("containers/{}/json", container_id), &[])?;
        let response = self.send(self.request(Method::GET, url)).await?;

        match response.status() {
            StatusCode::OK => {
                let inspected: InspectResponse = response
                    .json()
                    .await
                    .map_err(|e| AppError::Runtime(format!("Invalid inspect response: {}", e)))?;
                Ok(Some(inspected.into()))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::error_from(response, "Inspect container").await),
        }
    }

    async fn find_by_deployment(&self, deployment_id: Uuid) -> AppResult<Option<ContainerInfo>> {
        let labels = vec![
            format!("{}=true", MANAGED_LABEL),
            format!("{}={}", DEPLOYMENT_LABEL, deployment_id),
        ];
        let found = self.list(&labels).await?;

        match found.into_iter().next() {
            Some(listed) => self.inspect(&listed.id).await,
            None => Ok(None),
        }
    }

    async fn list_managed(&self) -> AppResult<Vec<ContainerInfo>> {
        self.list(&[format!("{}=true", MANAGED_LABEL)]).await
    }
}
