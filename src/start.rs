//! `expod start`: wire the dev servers together and run until a signal

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use expod_app::config::{ProjectSettingsStore, Settings};
use expod_app::server::{BundlerServerDeps, DevSessionSetup, PortChoice};
use expod_app::signals::stop_on_signal;
use expod_app::{
    load_settings, open_platforms, BundlerServer, DevServerManager, HttpDevSessionClient,
    OpenOptions, PlatformsOpened, ServerFactory, StartRequest, StaticFilesBackend,
    ToolAvailability, TunnelFactory,
};
use expod_core::prelude::*;
use expod_core::{BundlerKind, ProjectInfo, UrlOverrides};
use expod_daemon::{
    AdbReverseBridge, AndroidPlatformManager, BrowserPlatformManager, IosPlatformManager,
    KeyValueStore, NgrokProvider, TunnelConnector, TunnelProvider,
};

use crate::cli::{StartArgs, StartPlan};

/// Web output directories, first existing one wins
const WEB_OUTPUT_DIRS: &[&str] = &["dist", "web-build"];

/// Run `expod start` until SIGINT/SIGTERM
pub async fn run(args: StartArgs) -> Result<()> {
    // Flag conflicts fail before anything binds a port
    let plan = args.plan()?;
    let project_root = resolve_project_root(&plan.project_root)?;
    let settings = load_settings(&project_root);

    let mut project = settings.project.project_info(&project_root);
    if let Some(scheme) = &plan.options.location.scheme {
        project.scheme = Some(scheme.clone());
    }
    let mut options = plan.options.clone();
    options.location.scheme = project.scheme.clone();

    if options.https {
        eprintln!("HTTPS is not supported yet; serving over HTTP");
    }
    if plan.offline {
        info!("Offline mode: skipping dev session heartbeat");
    }

    let tools = ToolAvailability::check(&settings.tunnel.binary).await;
    let factory = server_factory(&project, &settings, &tools, plan.offline);
    let manager = DevServerManager::new(&project_root, factory)
        .with_watcher_debounce_ms(settings.watcher.debounce_ms);

    manager
        .start(vec![StartRequest::new(BundlerKind::Native, options)])
        .await?;
    if let Some(server) = manager.default_dev_server() {
        print_server(&server, settings.server.native_port).await;
    }

    manager.watch_environment_variables();
    manager.bootstrap_typescript().await;

    if !plan.platforms.is_empty() {
        open_requested_platforms(&manager, &plan).await;
    }

    eprintln!("Press Ctrl+C to stop");
    if let Err(e) = stop_on_signal(&manager).await {
        eprintln!("{}", e);
        return Err(e);
    }
    Ok(())
}

fn resolve_project_root(path: &Path) -> Result<PathBuf> {
    let root = dunce::canonicalize(path).map_err(|_| Error::NoProject {
        path: path.to_path_buf(),
    })?;
    if !root.join("package.json").is_file() && !root.join("app.json").is_file() {
        return Err(Error::NoProject { path: root });
    }
    Ok(root)
}

fn web_output_dir(project_root: &Path) -> PathBuf {
    WEB_OUTPUT_DIRS
        .iter()
        .map(|dir| project_root.join(dir))
        .find(|dir| dir.is_dir())
        .unwrap_or_else(|| project_root.to_path_buf())
}

fn tunnel_factory(settings: &Settings, tools: &ToolAvailability) -> TunnelFactory {
    let binary = tools
        .tunnel_binary
        .clone()
        .unwrap_or_else(|| PathBuf::from(&settings.tunnel.binary));
    let config = settings.tunnel.to_tunnel_config();
    let tools = tools.clone();

    Arc::new(move |project: &ProjectInfo, port: u16| {
        let provider: Arc<dyn TunnelProvider> = Arc::new(NgrokProvider::new(binary.clone()));
        let store: Arc<dyn KeyValueStore> = Arc::new(ProjectSettingsStore::new(&project.root));
        TunnelConnector::new(project, port, config.clone(), provider, store)
            .with_native_bridge(Arc::new(AdbReverseBridge::new(tools.clone())))
    })
}

fn server_factory(
    project: &ProjectInfo,
    settings: &Settings,
    tools: &ToolAvailability,
    offline: bool,
) -> ServerFactory {
    let project = project.clone();
    let tunnel = tunnel_factory(settings, tools);
    let dev_session = (settings.dev_session.enabled && !offline).then(|| DevSessionSetup {
        client: Arc::new(HttpDevSessionClient::new(&settings.dev_session.endpoint)),
        interval: Duration::from_secs(settings.dev_session.interval_secs.max(1)),
    });
    let server_settings = settings.server.clone();
    let tools = tools.clone();

    Arc::new(move |kind: BundlerKind| -> Result<BundlerServer> {
        let (backend, default_port) = match kind {
            BundlerKind::Native => (
                Arc::new(StaticFilesBackend::new(kind, &project.root)),
                server_settings.native_port,
            ),
            BundlerKind::Web => (
                Arc::new(StaticFilesBackend::new(kind, web_output_dir(&project.root))),
                server_settings.web_port,
            ),
        };

        let mut deps = BundlerServerDeps::new(project.clone(), backend, default_port);
        deps.probe_range = server_settings.port_probe_range;
        deps.tunnel_factory = Some(tunnel.clone());
        deps.dev_session = dev_session.clone();
        deps = match kind {
            BundlerKind::Native => deps
                .with_platform_manager(Arc::new(AndroidPlatformManager::new(tools.clone())))
                .with_platform_manager(Arc::new(IosPlatformManager::new(tools.clone()))),
            BundlerKind::Web => deps.with_platform_manager(Arc::new(BrowserPlatformManager)),
        };
        Ok(BundlerServer::new(deps))
    })
}

async fn print_server(server: &BundlerServer, default_port: u16) {
    let Some(location) = server.location() else {
        return;
    };
    if let Some(PortChoice {
        port,
        fallback: true,
    }) = server.port_choice()
    {
        eprintln!("Port {} is busy, using {} instead", default_port, port);
    }

    match server.native_runtime_url(&UrlOverrides::default()) {
        Ok(url) => eprintln!("Metro waiting on {}", url),
        Err(e) => warn!("No native URL: {}", e),
    }
    if let Some(tunnel_url) = server.tunnel_url().await {
        eprintln!("Tunnel ready at {}", tunnel_url);
    }
    eprintln!("Serving on {}", location.url);
}

async fn open_requested_platforms(manager: &DevServerManager, plan: &StartPlan) {
    match open_platforms(manager, plan.platforms, &OpenOptions::default()).await {
        Ok(PlatformsOpened::Opened { .. }) => {}
        Ok(PlatformsOpened::Aborted { platform }) => {
            info!("Opening {} was cancelled", platform);
        }
        Err(e) => eprintln!("{}", e),
    }
}
