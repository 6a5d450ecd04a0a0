//! Dev session heartbeat
//!
//! While a tunnel is up the server announces itself to the companion service
//! every `interval` so the project shows up on the user's devices. A failed
//! notification is logged and the next tick tries again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use expod_core::prelude::*;
use expod_core::ProjectInfo;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Payload announced for one running server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DevSessionInfo {
    pub description: String,
    pub hostname: String,
    pub config: DevSessionConfig,
    pub url: String,
    pub source: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DevSessionConfig {
    pub name: String,
    pub slug: String,
}

impl DevSessionInfo {
    pub fn new(project: &ProjectInfo, url: impl Into<String>) -> Self {
        let hostname = hostname();
        Self {
            description: format!("{} on {}", project.name, hostname),
            hostname,
            config: DevSessionConfig {
                name: project.name.clone(),
                slug: project.slug.clone(),
            },
            url: url.into(),
            source: "desktop",
        }
    }
}

fn hostname() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[derive(Serialize)]
struct SessionBody<'a> {
    session: &'a DevSessionInfo,
}

/// The companion service that tracks live dev sessions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DevSessionClient: Send + Sync {
    async fn notify_alive(&self, session: &DevSessionInfo) -> Result<()>;

    async fn notify_close(&self, session: &DevSessionInfo) -> Result<()>;
}

/// [`DevSessionClient`] over HTTP
#[derive(Debug, Clone)]
pub struct HttpDevSessionClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDevSessionClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, path: &str, session: &DevSessionInfo) -> Result<()> {
        let url = format!("{}/{}", self.endpoint, path);
        let response = self
            .client
            .post(&url)
            .json(&SessionBody { session })
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| Error::http(format!("POST {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::http(format!(
                "POST {} returned {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DevSessionClient for HttpDevSessionClient {
    async fn notify_alive(&self, session: &DevSessionInfo) -> Result<()> {
        self.post("notify-alive", session).await
    }

    async fn notify_close(&self, session: &DevSessionInfo) -> Result<()> {
        self.post("notify-close", session).await
    }
}

/// A running heartbeat
pub struct DevSession {
    client: Arc<dyn DevSessionClient>,
    info: DevSessionInfo,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for DevSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevSession")
            .field("info", &self.info)
            .field("running", &self.task.is_some())
            .finish()
    }
}

impl DevSession {
    /// Start notifying `client` every `interval`; the first notification is immediate
    pub fn start(client: Arc<dyn DevSessionClient>, info: DevSessionInfo, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task_client = client.clone();
        let task_info = info.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = task_client.notify_alive(&task_info).await {
                            warn!("Dev session heartbeat failed: {}", e);
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Dev session heartbeat stopped");
        });

        Self {
            client,
            info,
            shutdown_tx,
            task: Some(task),
        }
    }

    pub fn info(&self) -> &DevSessionInfo {
        &self.info
    }

    /// Stop the heartbeat and announce the close. Safe to call twice.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = task.await {
            warn!("Dev session task ended abnormally: {}", e);
        }
        self.client.notify_close(&self.info).await
    }
}

impl Drop for DevSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
