use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::runtime::{
    ContainerInfo, ContainerRuntime, ContainerSpec, ContainerState, DEPLOYMENT_LABEL,
    MANAGED_LABEL,
};

/// Scriptable container engine for tests. Containers move to `Running` on
/// start and stay there until a test exits them.
#[derive(Clone, Default)]
pub struct InMemoryRuntime {
    inner: Arc<Mutex<InMemoryRuntimeInner>>,
}

#[derive(Default)]
struct InMemoryRuntimeInner {
    containers: HashMap<String, FakeContainer>,
    next_id: u64,
    next_create_error: Option<AppError>,
    next_start_error: Option<AppError>,
    /// Deployment ids whose containers exit right after start
    exit_on_start: HashMap<Uuid, i64>,
}

#[derive(Debug, Clone)]
struct FakeContainer {
    info: ContainerInfo,
    spec: Option<ContainerSpec>,
    stopped_with: Option<Duration>,
}

impl InMemoryRuntimeInner {
    fn find_mut(&mut self, reference: &str) -> Option<&mut FakeContainer> {
        if self.containers.contains_key(reference) {
            return self.containers.get_mut(reference);
        }
        self.containers
            .values_mut()
            .find(|c| c.info.name == reference)
    }

    fn by_deployment(&self, deployment_id: Uuid) -> Option<&FakeContainer> {
        let wanted = deployment_id.to_string();
        self.containers
            .values()
            .find(|c| c.info.labels.get(DEPLOYMENT_LABEL) == Some(&wanted))
    }
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `create` call with `error`
    pub async fn fail_next_create(&self, error: AppError) {
        self.inner.lock().await.next_create_error = Some(error);
    }

    /// Fail the next `start` call with `error`
    pub async fn fail_next_start(&self, error: AppError) {
        self.inner.lock().await.next_start_error = Some(error);
    }

    /// The container for `deployment_id` exits with `code` as soon as it
    /// starts
    pub async fn exit_on_start(&self, deployment_id: Uuid, code: i64) {
        self.inner
            .lock()
            .await
            .exit_on_start
            .insert(deployment_id, code);
    }

    /// Mark the container of a deployment as exited
    pub async fn exit(&self, deployment_id: Uuid, code: i64) {
        self.halt(deployment_id, ContainerState::Exited { code }).await;
    }

    /// Mark the container of a deployment as dead
    pub async fn kill(&self, deployment_id: Uuid) {
        self.halt(deployment_id, ContainerState::Dead).await;
    }

    async fn halt(&self, deployment_id: Uuid, state: ContainerState) {
        let mut inner = self.inner.lock().await;
        let wanted = deployment_id.to_string();
        for container in inner.containers.values_mut() {
            if container.info.labels.get(DEPLOYMENT_LABEL) == Some(&wanted) {
                container.info.state = state;
                container.info.ip_address = None;
            }
        }
    }

    /// Drop the container of a deployment behind the engine's back
    pub async fn vanish(&self, deployment_id: Uuid) {
        let mut inner = self.inner.lock().await;
        let wanted = deployment_id.to_string();
        inner
            .containers
            .retain(|_, c| c.info.labels.get(DEPLOYMENT_LABEL) != Some(&wanted));
    }

    /// Register a running managed container not created through `create`
    pub async fn add_running(&self, name: &str, labels: BTreeMap<String, String>) -> String {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = format!("fake{:08}", inner.next_id);
        let mut labels = labels;
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        let ip = format!("10.0.0.{}", inner.next_id % 250 + 2);

        inner.containers.insert(
            id.clone(),
            FakeContainer {
                info: ContainerInfo {
                    id: id.clone(),
                    name: name.to_string(),
                    state: ContainerState::Running,
                    ip_address: Some(ip),
                    labels,
                },
                spec: None,
                stopped_with: None,
            },
        );
        id
    }

    pub async fn spec_for(&self, deployment_id: Uuid) -> Option<ContainerSpec> {
        let inner = self.inner.lock().await;
        inner.by_deployment(deployment_id).and_then(|c| c.spec.clone())
    }

    pub async fn state_of(&self, deployment_id: Uuid) -> Option<ContainerState> {
        let inner = self.inner.lock().await;
        inner.by_deployment(deployment_id).map(|c| c.info.state)
    }

    /// Grace period the container was last stopped with
    pub async fn stop_grace_of(&self, deployment_id: Uuid) -> Option<Duration> {
        let inner = self.inner.lock().await;
        inner
            .by_deployment(deployment_id)
            .and_then(|c| c.stopped_with)
    }

    pub async fn container_count(&self) -> usize {
        self.inner.lock().await.containers.len()
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn create(&self, spec: &ContainerSpec) -> AppResult<String> {
        let mut inner = self.inner.lock().await;
        if let Some(error) = inner.next_create_error.take() {
            return Err(error);
        }

        if let Some(existing) = inner.containers.values().find(|c| c.info.name == spec.name) {
            return Ok(existing.info.id.clone());
        }

        inner.next_id += 1;
        let id = format!("fake{:08}", inner.next_id);
        inner.containers.insert(
            id.clone(),
            FakeContainer {
                info: ContainerInfo {
                    id: id.clone(),
                    name: spec.name.clone(),
                    state: ContainerState::Created,
                    ip_address: None,
                    labels: spec.labels.clone(),
                },
                spec: Some(spec.clone()),
                stopped_with: None,
            },
        );
        Ok(id)
    }

    async fn start(&self, container_id: &str) -> AppResult<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if let Some(error) = inner.next_start_error.take() {
            return Err(error);
        }

        let address = format!("10.0.0.{}", inner.next_id % 250 + 2);
        let exit_codes = inner.exit_on_start.clone();
        let container = inner
            .find_mut(container_id)
            .ok_or_else(|| AppError::Runtime(format!("No such container: {}", container_id)))?;

        if container.info.state == ContainerState::Running {
            return Ok(());
        }

        let exit_code = container
            .info
            .deployment_id()
            .and_then(|id| exit_codes.get(&id).copied());
        match exit_code {
            Some(code) => {
                container.info.state = ContainerState::Exited { code };
                container.info.ip_address = None;
            }
            None => {
                container.info.state = ContainerState::Running;
                container.info.ip_address = Some(address);
            }
        }
        Ok(())
    }

    async fn stop(&self, container_id: &str, grace: Duration) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(container) = inner.find_mut(container_id) {
            if container.info.state == ContainerState::Running {
                container.info.state = ContainerState::Exited { code: 0 };
            }
            container.info.ip_address = None;
            container.stopped_with = Some(grace);
        }
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        let id = inner.find_mut(container_id).map(|c| c.info.id.clone());
        if let Some(id) = id {
            inner.containers.remove(&id);
        }
        Ok(())
    }

    async fn inspect(&self, container_id: &str) -> AppResult<Option<ContainerInfo>> {
        let mut inner = self.inner.lock().await;
        Ok(inner.find_mut(container_id).map(|c| c.info.clone()))
    }

    async fn find_by_deployment(&self, deployment_id: Uuid) -> AppResult<Option<ContainerInfo>> {
        let inner = self.inner.lock().await;
        Ok(inner.by_deployment(deployment_id).map(|c| c.info.clone()))
    }

    async fn list_managed(&self) -> AppResult<Vec<ContainerInfo>> {
        let inner = self.inner.lock().await;
        let mut managed: Vec<ContainerInfo> = inner
            .containers
            .values()
            .filter(|c| c.info.labels.get(MANAGED_LABEL).map(String::as_str) == Some("true"))
            .map(|c| c.info.clone())
            .collect();
        managed.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(managed)
    }
}
