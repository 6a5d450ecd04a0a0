//! One dev server: HTTP + message socket, URLs, and an optional tunnel
//!
//! Start order is bind, URL creator, bundler, serve, tunnel, heartbeat.
//! [`BundlerServer::stop`] unwinds in the reverse order, and a failed start
//! unwinds whatever it had already acquired before returning the error.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use expod_core::prelude::*;
use expod_core::{
    BundlerKind, BundlerStartOptions, HostType, ProjectInfo, Protocol, RuntimeTarget,
    ServerLocation, UrlCreator, UrlOverrides,
};
use expod_daemon::{LaunchOutcome, OpenOptions, PlatformManager, TunnelConnector};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::backend::BundlerBackend;
use super::dev_session::{DevSession, DevSessionClient, DevSessionInfo};
use super::middleware::{expo_routes, manifest_routes, ManifestType, RouteContext};
use super::port::{bind_host, bind_port, metro_port_override, PortChoice, PortRequest};
use super::socket::{message_handler, MessageSocket};

/// Builds the tunnel for a server once its port is bound
pub type TunnelFactory = Arc<dyn Fn(&ProjectInfo, u16) -> TunnelConnector + Send + Sync>;

/// Heartbeat client and its interval
#[derive(Clone)]
pub struct DevSessionSetup {
    pub client: Arc<dyn DevSessionClient>,
    pub interval: Duration,
}

/// Collaborators a [`BundlerServer`] is built from
#[derive(Clone)]
pub struct BundlerServerDeps {
    pub project: ProjectInfo,
    pub backend: Arc<dyn BundlerBackend>,
    /// First port tried when none is requested
    pub default_port: u16,
    pub probe_range: u16,
    /// Required for `HostType::Tunnel`
    pub tunnel_factory: Option<TunnelFactory>,
    pub dev_session: Option<DevSessionSetup>,
    pub platform_managers: HashMap<RuntimeTarget, Arc<dyn PlatformManager>>,
    /// Pin the LAN host instead of resolving it
    pub lan_host: Option<String>,
}

impl BundlerServerDeps {
    pub fn new(project: ProjectInfo, backend: Arc<dyn BundlerBackend>, default_port: u16) -> Self {
        Self {
            project,
            backend,
            default_port,
            probe_range: 20,
            tunnel_factory: None,
            dev_session: None,
            platform_managers: HashMap::new(),
            lan_host: None,
        }
    }

    pub fn with_platform_manager(mut self, manager: Arc<dyn PlatformManager>) -> Self {
        self.platform_managers.insert(manager.runtime(), manager);
        self
    }
}

/// Read-only view of a started server
#[derive(Debug, Clone)]
struct Snapshot {
    location: ServerLocation,
    port_choice: PortChoice,
    url_creator: UrlCreator,
    options: BundlerStartOptions,
}

/// Resources held while running, released by `stop`
struct Running {
    shutdown_tx: Option<oneshot::Sender<()>>,
    serve_task: JoinHandle<()>,
    tunnel: Option<Arc<TunnelConnector>>,
    dev_session: Option<DevSession>,
}

/// A bundler behind an HTTP server
pub struct BundlerServer {
    deps: BundlerServerDeps,
    socket: Arc<MessageSocket>,
    running: Mutex<Option<Running>>,
    snapshot: RwLock<Option<Snapshot>>,
}

impl fmt::Debug for BundlerServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundlerServer")
            .field("kind", &self.kind())
            .field("location", &self.location())
            .finish()
    }
}

impl BundlerServer {
    pub fn new(deps: BundlerServerDeps) -> Self {
        Self {
            deps,
            socket: Arc::new(MessageSocket::new()),
            running: Mutex::new(None),
            snapshot: RwLock::new(None),
        }
    }

    pub fn kind(&self) -> BundlerKind {
        self.deps.backend.kind()
    }

    pub fn project(&self) -> &ProjectInfo {
        &self.deps.project
    }

    fn snapshot(&self) -> Option<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_snapshot(&self, snapshot: Option<Snapshot>) {
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = snapshot;
    }

    pub fn is_running(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Where the server is bound; None until started
    pub fn location(&self) -> Option<ServerLocation> {
        self.snapshot().map(|s| s.location)
    }

    /// Which port was picked and whether it was a fallback
    pub fn port_choice(&self) -> Option<PortChoice> {
        self.snapshot().map(|s| s.port_choice)
    }

    pub fn url_creator(&self) -> Option<UrlCreator> {
        self.snapshot().map(|s| s.url_creator)
    }

    /// Options the server was started with
    pub fn options(&self) -> Option<BundlerStartOptions> {
        self.snapshot().map(|s| s.options)
    }

    /// Connected message socket clients
    pub fn client_count(&self) -> usize {
        self.socket.client_count()
    }

    fn port_request(&self, options: &BundlerStartOptions) -> PortRequest {
        let requested = options.port.or_else(|| {
            // Dev clients are built against a fixed bundler port
            (self.kind() == BundlerKind::Native && options.dev_client)
                .then(|| metro_port_override().unwrap_or(self.deps.default_port))
        });
        PortRequest {
            requested,
            default: self.deps.default_port,
            probe_range: self.deps.probe_range,
        }
    }

    /// Bind, serve and, for tunnels, connect and start the heartbeat
    pub async fn start(&self, options: BundlerStartOptions) -> Result<ServerLocation> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(Error::usage(format!(
                "The {} dev server is already running",
                self.kind()
            )));
        }

        let host_type = options.location.host_type;
        if host_type == HostType::Tunnel && self.deps.tunnel_factory.is_none() {
            return Err(Error::TunnelUnavailable {
                reason: "no tunnel provider configured".to_string(),
            });
        }

        let (listener, port_choice) = bind_port(
            bind_host(host_type == HostType::Localhost),
            self.port_request(&options),
        )
        .await?;
        let port = port_choice.port;
        debug!("{} bound to port {}", self.kind(), port);

        let tunnel = self
            .deps
            .tunnel_factory
            .as_ref()
            .filter(|_| host_type == HostType::Tunnel)
            .map(|factory| Arc::new(factory(&self.deps.project, port)));

        let mut url_creator = UrlCreator::new(
            options.location.clone(),
            port,
            tunnel.as_ref().map(|t| t.url_getter()),
        );
        if let Some(host) = &self.deps.lan_host {
            url_creator = url_creator.with_lan_host(host.clone());
        }

        // Dropping the listener on error releases the port
        self.deps.backend.start(&options).await?;

        let manifest_type = if options.dev_client {
            ManifestType::ExpoUpdates
        } else {
            ManifestType::ExpoGo
        };
        let app = self.router(RouteContext {
            project: self.deps.project.clone(),
            url_creator: url_creator.clone(),
            options: options.clone(),
            manifest_type,
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let kind = self.kind();
        let serve_task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                error!("{} server error: {}", kind, e);
            }
        });

        let mut resources = Running {
            shutdown_tx: Some(shutdown_tx),
            serve_task,
            tunnel: None,
            dev_session: None,
        };

        if let Some(tunnel) = tunnel {
            match tunnel.start().await {
                Ok(url) => info!("Tunnel ready: {}", url),
                Err(e) => {
                    warn!("Tunnel failed to start, stopping {} server", self.kind());
                    if let Err(stop_err) = tunnel.stop().await {
                        warn!("Tunnel cleanup failed: {}", stop_err);
                    }
                    self.release(resources).await;
                    return Err(e);
                }
            }
            resources.tunnel = Some(tunnel);

            if let Some(setup) = &self.deps.dev_session {
                match url_creator.construct_url(&UrlOverrides::scheme("exp")) {
                    Some(url) => {
                        let info = DevSessionInfo::new(&self.deps.project, url);
                        resources.dev_session =
                            Some(DevSession::start(setup.client.clone(), info, setup.interval));
                    }
                    None => warn!("Tunnel has no URL, skipping dev session heartbeat"),
                }
            }
        }

        let location = ServerLocation::new(
            Protocol::Http,
            url_creator
                .construct_url(&UrlOverrides::default())
                .and_then(|u| url::Url::parse(&u).ok())
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_else(|| "localhost".to_string()),
            port,
        );
        if options.https {
            warn!("HTTPS was requested but {} serves plain HTTP", self.kind());
        }

        self.set_snapshot(Some(Snapshot {
            location: location.clone(),
            port_choice,
            url_creator,
            options,
        }));
        *running = Some(resources);
        info!("{} dev server running at {}", self.kind(), location.url);
        Ok(location)
    }

    fn router(&self, context: RouteContext) -> Router {
        let message = Router::new()
            .route("/message", get(message_handler))
            .with_state(self.socket.clone());

        expo_routes(context)
            .merge(message)
            .merge(self.deps.backend.router())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Close the socket, stop serving and stop the bundler
    async fn release(&self, mut resources: Running) -> Vec<String> {
        let mut failures = Vec::new();
        self.socket.close_all();
        if let Some(tx) = resources.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = resources.serve_task.await {
            failures.push(format!("{} server task: {}", self.kind(), e));
        }
        if let Err(e) = self.deps.backend.stop().await {
            failures.push(format!("{} bundler: {}", self.kind(), e));
        }
        failures
    }

    /// Stop heartbeat and tunnel, then the server. Stopping twice is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        let Some(mut resources) = running.take() else {
            return Ok(());
        };
        self.set_snapshot(None);

        let mut failures = Vec::new();
        if let Some(mut session) = resources.dev_session.take() {
            if let Err(e) = session.stop().await {
                // The companion service forgets sessions that stop beating
                debug!("Dev session close notification failed: {}", e);
            }
        }
        if let Some(tunnel) = resources.tunnel.take() {
            if let Err(e) = tunnel.stop().await {
                failures.push(format!("tunnel: {}", e));
            }
        }
        failures.extend(self.release(resources).await);

        if failures.is_empty() {
            info!("{} dev server stopped", self.kind());
            Ok(())
        } else {
            for failure in &failures {
                error!("Stop failed: {}", failure);
            }
            Err(Error::Teardown { failures })
        }
    }

    /// Push `method` to every connected client; returns how many were reached
    pub fn broadcast_message(&self, method: &str, params: Value) -> usize {
        self.socket.broadcast(method, &params)
    }

    /// Deep link a native Expo Go or dev-client app should open
    pub fn native_runtime_url(&self, overrides: &UrlOverrides) -> Result<String> {
        let snapshot = self
            .snapshot()
            .ok_or_else(|| Error::not_running("native_runtime_url"))?;
        snapshot
            .url_creator
            .construct_deep_link(snapshot.options.dev_client, overrides)
    }

    /// Plain HTTP(S) URL for browsers
    fn desktop_url(snapshot: &Snapshot) -> Result<String> {
        let scheme = match snapshot.url_creator.host_type() {
            HostType::Tunnel => "https",
            _ => "http",
        };
        snapshot
            .url_creator
            .construct_url(&UrlOverrides::scheme(scheme))
            .ok_or(Error::TunnelInactive)
    }

    /// Open the app on `runtime` through its platform manager
    pub async fn open_platform(
        &self,
        runtime: RuntimeTarget,
        options: &OpenOptions,
    ) -> Result<LaunchOutcome> {
        let snapshot = self
            .snapshot()
            .ok_or_else(|| Error::not_running("open_platform"))?;
        let manager = self.deps.platform_managers.get(&runtime).ok_or_else(|| {
            Error::platform(
                runtime.platform().as_str(),
                format!("no platform manager registered for the {} server", self.kind()),
            )
        })?;

        let url = if runtime.is_native() {
            self.native_runtime_url(&UrlOverrides::default())?
        } else {
            Self::desktop_url(&snapshot)?
        };

        let outcome = manager.open(&url, options).await?;
        if outcome.is_aborted() {
            debug!("Opening {} was cancelled", runtime.platform());
        }
        Ok(outcome)
    }

    /// Manifest routes of type `kind` ("expo-go" or "expo-updates")
    pub fn manifest_middleware(&self, kind: &str) -> Result<Router> {
        let manifest_type: ManifestType = kind.parse()?;
        let snapshot = self
            .snapshot()
            .ok_or_else(|| Error::not_running("manifest_middleware"))?;
        Ok(manifest_routes(RouteContext {
            project: self.deps.project.clone(),
            url_creator: snapshot.url_creator,
            options: snapshot.options,
            manifest_type,
        }))
    }

    /// The tunnel URL, if this server runs a connected tunnel
    pub async fn tunnel_url(&self) -> Option<String> {
        self.running
            .lock()
            .await
            .as_ref()
            .and_then(|r| r.tunnel.as_ref())
            .and_then(|t| t.active_url())
    }
}
