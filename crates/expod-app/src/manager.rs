//! Owns every dev server of one `start` invocation
//!
//! Servers of different kinds start concurrently and are kept in a registry
//! keyed by [`BundlerKind`]. A failed start of one kind does not hide the
//! other's outcome, and `stop` attempts every server even when some fail.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use expod_core::prelude::*;
use expod_core::{BundlerKind, BundlerStartOptions, Mode, ServerLocation};
use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use crate::env_watcher::{EnvEvent, EnvWatcher};
use crate::prerequisites::{ProjectPrerequisite, WebSupportPrerequisite};
use crate::server::BundlerServer;
use crate::typescript::{bootstrap_typescript, TypeScriptSetup};

/// Builds an unstarted server for a bundler kind
pub type ServerFactory = Arc<dyn Fn(BundlerKind) -> Result<BundlerServer> + Send + Sync>;

/// One server to start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub kind: BundlerKind,
    pub options: BundlerStartOptions,
}

impl StartRequest {
    pub fn new(kind: BundlerKind, options: BundlerStartOptions) -> Self {
        Self { kind, options }
    }
}

type Registry = Arc<RwLock<HashMap<BundlerKind, Arc<BundlerServer>>>>;

/// Runs and tracks the native and web dev servers
pub struct DevServerManager {
    project_root: PathBuf,
    factory: ServerFactory,
    servers: Registry,
    web_prerequisite: Arc<dyn ProjectPrerequisite>,
    /// Outcome per prerequisite name; `Err` keeps the failure message
    prerequisites: Mutex<HashMap<String, std::result::Result<(), String>>>,
    /// Options of the first start, reused when web is started lazily
    base_options: RwLock<Option<BundlerStartOptions>>,
    env_watcher: std::sync::Mutex<Option<EnvWatcher>>,
    watcher_debounce_ms: u64,
}

impl std::fmt::Debug for DevServerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevServerManager")
            .field("project_root", &self.project_root)
            .field("servers", &self.running_kinds())
            .finish()
    }
}

impl DevServerManager {
    pub fn new(project_root: &Path, factory: ServerFactory) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            factory,
            servers: Arc::new(RwLock::new(HashMap::new())),
            web_prerequisite: Arc::new(WebSupportPrerequisite::new(project_root)),
            prerequisites: Mutex::new(HashMap::new()),
            base_options: RwLock::new(None),
            env_watcher: std::sync::Mutex::new(None),
            watcher_debounce_ms: crate::env_watcher::DEFAULT_DEBOUNCE_MS,
        }
    }

    /// Replace the check run before a web server starts
    pub fn with_web_prerequisite(mut self, prerequisite: Arc<dyn ProjectPrerequisite>) -> Self {
        self.web_prerequisite = prerequisite;
        self
    }

    pub fn with_watcher_debounce_ms(mut self, ms: u64) -> Self {
        self.watcher_debounce_ms = ms;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    fn server(&self, kind: BundlerKind) -> Option<Arc<BundlerServer>> {
        self.servers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .cloned()
    }

    /// Kinds with a registered server, in a stable order
    pub fn running_kinds(&self) -> Vec<BundlerKind> {
        let mut kinds: Vec<_> = self
            .servers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        kinds.sort();
        kinds
    }

    /// The native server if running, otherwise any running server
    pub fn default_dev_server(&self) -> Option<Arc<BundlerServer>> {
        self.server(BundlerKind::Native)
            .or_else(|| self.server(BundlerKind::Web))
    }

    pub fn web_dev_server(&self) -> Option<Arc<BundlerServer>> {
        self.server(BundlerKind::Web)
    }

    /// Start every request concurrently.
    ///
    /// Servers that started stay registered even when another kind failed;
    /// the failure is reported as [`Error::PartialStart`] naming both sides.
    pub async fn start(&self, requests: Vec<StartRequest>) -> Result<Vec<ServerLocation>> {
        if let Some(first) = requests.first() {
            let mut base = self.base_options.write().unwrap_or_else(|e| e.into_inner());
            if base.is_none() {
                *base = Some(first.options.clone());
            }
        }

        let results = join_all(
            requests
                .iter()
                .map(|request| self.start_one(request.kind, request.options.clone())),
        )
        .await;

        // A single request keeps its own error so usage errors stay usage errors
        if requests.len() == 1 {
            let mut results = results;
            return match results.pop() {
                Some(result) => result.map(|server| server.location().into_iter().collect()),
                None => Ok(Vec::new()),
            };
        }

        let mut locations = Vec::new();
        let mut started = Vec::new();
        let mut failed = Vec::new();
        for (request, result) in requests.iter().zip(results) {
            match result {
                Ok(server) => {
                    locations.extend(server.location());
                    started.push(request.kind.to_string());
                }
                Err(e) => {
                    error!("Failed to start {}: {}", request.kind, e);
                    failed.push((request.kind.to_string(), e.to_string()));
                }
            }
        }

        if failed.is_empty() {
            Ok(locations)
        } else {
            Err(Error::PartialStart { started, failed })
        }
    }

    async fn start_one(
        &self,
        kind: BundlerKind,
        options: BundlerStartOptions,
    ) -> Result<Arc<BundlerServer>> {
        if self.server(kind).is_some() {
            return Err(Error::usage(format!("The {} dev server is already running", kind)));
        }
        if kind == BundlerKind::Web {
            let prerequisite = self.web_prerequisite.clone();
            self.ensure_project_prerequisite(prerequisite.as_ref())
                .await?;
        }

        let server = Arc::new((self.factory)(kind)?);
        server.start(options).await?;

        let inserted = {
            let mut servers = self.servers.write().unwrap_or_else(|e| e.into_inner());
            if servers.contains_key(&kind) {
                false
            } else {
                servers.insert(kind, server.clone());
                true
            }
        };
        if !inserted {
            warn!("{} was started concurrently, stopping the duplicate", kind);
            server.stop().await?;
            return Err(Error::usage(format!("The {} dev server is already running", kind)));
        }
        Ok(server)
    }

    /// Run `prerequisite` once; later calls reuse the first outcome
    pub async fn ensure_project_prerequisite(
        &self,
        prerequisite: &dyn ProjectPrerequisite,
    ) -> Result<()> {
        let name = prerequisite.name().to_string();
        let mut cache = self.prerequisites.lock().await;
        if let Some(outcome) = cache.get(&name) {
            return outcome
                .clone()
                .map_err(|message| Error::prerequisite(name.clone(), message));
        }

        let result = prerequisite.assert().await;
        let outcome = match &result {
            Ok(()) => Ok(()),
            Err(Error::Prerequisite { message, .. }) => Err(message.clone()),
            Err(e) => Err(e.to_string()),
        };
        cache.insert(name, outcome);
        result
    }

    /// The web server, starting it with the initial options if needed
    pub async fn ensure_web_dev_server_running(&self) -> Result<Arc<BundlerServer>> {
        if let Some(server) = self.web_dev_server() {
            return Ok(server);
        }
        let mut options = self
            .base_options
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_default();
        // The native port request does not carry over
        options.port = None;

        info!("Starting the web dev server");
        self.start_one(BundlerKind::Web, options).await
    }

    /// Load `.env*` files and broadcast `reload` to the default server on change.
    ///
    /// Failures are logged; the dev servers keep running either way.
    pub fn watch_environment_variables(&self) {
        let mut slot = self.env_watcher.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }
        let mode = self
            .base_options
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|o| o.mode)
            .unwrap_or(Mode::Development);

        let mut watcher = EnvWatcher::new(self.project_root.clone(), mode)
            .with_debounce_ms(self.watcher_debounce_ms);
        let (tx, mut rx) = mpsc::channel(16);
        if let Err(e) = watcher.start(tx) {
            warn!("Could not watch environment variables: {}", e);
            return;
        }
        *slot = Some(watcher);

        let servers = self.servers.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    EnvEvent::Reloaded { .. } => {
                        let server = {
                            let servers = servers.read().unwrap_or_else(|e| e.into_inner());
                            servers
                                .get(&BundlerKind::Native)
                                .or_else(|| servers.get(&BundlerKind::Web))
                                .cloned()
                        };
                        if let Some(server) = server {
                            let reached = server.broadcast_message("reload", Value::Null);
                            debug!("Env change: reload sent to {} client(s)", reached);
                        }
                    }
                    EnvEvent::Error { message } => warn!("Env watcher: {}", message),
                }
            }
        });
    }

    /// Write a default `tsconfig.json` for TypeScript projects. Failures are logged.
    pub async fn bootstrap_typescript(&self) -> Option<TypeScriptSetup> {
        match bootstrap_typescript(&self.project_root).await {
            Ok(setup) => Some(setup),
            Err(e) => {
                warn!("TypeScript setup failed: {}", e);
                None
            }
        }
    }

    /// Stop every server; all are attempted and failures reported together
    pub async fn stop(&self) -> Result<()> {
        if let Some(mut watcher) = self
            .env_watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            watcher.stop();
        }

        let servers: Vec<(BundlerKind, Arc<BundlerServer>)> = self
            .servers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();

        let results = join_all(servers.iter().map(|(_, server)| server.stop())).await;
        let failures: Vec<String> = servers
            .iter()
            .zip(results)
            .filter_map(|((kind, _), result)| result.err().map(|e| format!("{}: {}", kind, e)))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Teardown { failures })
        }
    }
}
