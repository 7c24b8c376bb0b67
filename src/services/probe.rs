use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::config::{Config, ProbeMode};
use crate::error::{AppError, AppResult};

/// Readiness check against a runner's internal address
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// `Ok(true)` once the runner accepts traffic. Callers wrap this in
    /// their own timeout.
    async fn check(&self, address: &str, port: u16) -> AppResult<bool>;
}

/// Any HTTP response on `/` counts as ready, whatever the status code
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build probe client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    async fn check(&self, address: &str, port: u16) -> AppResult<bool> {
        let url = format!("http://{}:{}/", address, port);
        match self.client.get(&url).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Probe request failed");
                Ok(false)
            }
        }
    }
}

/// An accepted TCP connection counts as ready
pub struct TcpProbe;

#[async_trait]
impl ReadinessProbe for TcpProbe {
    async fn check(&self, address: &str, port: u16) -> AppResult<bool> {
        Ok(TcpStream::connect((address, port)).await.is_ok())
    }
}

/// Probe matching the configured mode
pub fn probe_from_config(config: &Config) -> AppResult<Arc<dyn ReadinessProbe>> {
    Ok(match config.probe_mode {
        ProbeMode::Http => Arc::new(HttpProbe::new(config.probe_timeout)?),
        ProbeMode::Tcp => Arc::new(TcpProbe),
    })
}

/// Probe answering from a set of addresses marked ready, for tests
#[derive(Clone, Default)]
pub struct StaticProbe {
    ready: Arc<Mutex<HashSet<String>>>,
    ready_all: Arc<Mutex<bool>>,
}

impl StaticProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_ready(&self, address: &str) {
        self.ready.lock().await.insert(address.to_string());
    }

    /// Report every address as ready (or not)
    pub async fn set_all_ready(&self, ready: bool) {
        *self.ready_all.lock().await = ready;
    }
}

#[async_trait]
impl ReadinessProbe for StaticProbe {
    async fn check(&self, address: &str, _port: u16) -> AppResult<bool> {
        if *self.ready_all.lock().await {
            return Ok(true);
        }
        Ok(self.ready.lock().await.contains(address))
    }
}
