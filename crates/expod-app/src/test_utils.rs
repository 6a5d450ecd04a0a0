//! Test doubles for dev servers
//!
//! Enabled with the `test-helpers` feature. Servers built by
//! [`fake_server_factory`] bind an OS-assigned loopback port, answer
//! `/index.bundle` from memory and record start/stop in a [`CallLog`].

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::routing::get;
use axum::Router;
use expod_core::prelude::*;
use expod_core::{BundlerKind, BundlerStartOptions, ProjectInfo, RuntimeTarget};
use expod_daemon::test_utils::CallLog;
use expod_daemon::PlatformManager;

use crate::manager::ServerFactory;
use crate::prerequisites::ProjectPrerequisite;
use crate::server::{BundlerBackend, BundlerServer, BundlerServerDeps};

/// Backend that serves a fixed bundle
#[derive(Debug)]
pub struct FakeBackend {
    kind: BundlerKind,
    fail_start: bool,
    log: CallLog,
}

impl FakeBackend {
    pub fn new(kind: BundlerKind, log: CallLog) -> Self {
        Self {
            kind,
            fail_start: false,
            log,
        }
    }

    pub fn failing(kind: BundlerKind, log: CallLog) -> Self {
        Self {
            kind,
            fail_start: true,
            log,
        }
    }
}

#[async_trait]
impl BundlerBackend for FakeBackend {
    fn kind(&self) -> BundlerKind {
        self.kind
    }

    async fn start(&self, _options: &BundlerStartOptions) -> Result<()> {
        self.log.push(format!("start:{}", self.kind));
        if self.fail_start {
            return Err(Error::process(format!("{} failed to start", self.kind)));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.log.push(format!("stop:{}", self.kind));
        Ok(())
    }

    fn router(&self) -> Router {
        Router::new().route("/index.bundle", get(|| async { "// bundle" }))
    }
}

/// Prerequisite with a fixed outcome that counts its runs
#[derive(Debug, Default)]
pub struct FakePrerequisite {
    pub fail: bool,
    runs: AtomicUsize,
}

impl FakePrerequisite {
    pub fn passing() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            runs: AtomicUsize::new(0),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProjectPrerequisite for FakePrerequisite {
    fn name(&self) -> &str {
        "fake"
    }

    async fn assert(&self) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(Error::prerequisite("fake", "not satisfied"))
        } else {
            Ok(())
        }
    }
}

/// Factory for servers backed by [`FakeBackend`].
///
/// Kinds listed in `failing` get a backend that refuses to start. Native
/// servers get the simulator/emulator managers, web servers the desktop one.
pub fn fake_server_factory(
    project_root: &Path,
    log: CallLog,
    managers: Vec<Arc<dyn PlatformManager>>,
    failing: &[BundlerKind],
) -> ServerFactory {
    let project = ProjectInfo::from_root(project_root);
    let failing = failing.to_vec();
    Arc::new(move |kind: BundlerKind| -> Result<BundlerServer> {
        let backend: Arc<dyn BundlerBackend> = if failing.contains(&kind) {
            Arc::new(FakeBackend::failing(kind, log.clone()))
        } else {
            Arc::new(FakeBackend::new(kind, log.clone()))
        };
        let mut deps = BundlerServerDeps::new(project.clone(), backend, 0);
        deps.lan_host = Some("127.0.0.1".to_string());
        for manager in &managers {
            let serves_kind = match manager.runtime() {
                RuntimeTarget::Desktop => kind == BundlerKind::Web,
                _ => kind == BundlerKind::Native,
            };
            if serves_kind {
                deps = deps.with_platform_manager(manager.clone());
            }
        }
        Ok(BundlerServer::new(deps))
    })
}
