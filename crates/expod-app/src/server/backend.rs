//! Bundler backends mounted behind a dev server
//!
//! The bundler itself is an opaque collaborator: the dev server starts and
//! stops it and routes any request it does not handle to the backend's router.

use std::path::PathBuf;

use async_trait::async_trait;
use axum::Router;
use expod_core::prelude::*;
use expod_core::{BundlerKind, BundlerStartOptions};
use tower_http::services::ServeDir;

/// A bundler the dev server fronts
#[async_trait]
pub trait BundlerBackend: Send + Sync {
    fn kind(&self) -> BundlerKind;

    async fn start(&self, options: &BundlerStartOptions) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Routes for bundles and assets
    fn router(&self) -> Router;
}

/// Serves prebuilt files from a directory
#[derive(Debug, Clone)]
pub struct StaticFilesBackend {
    kind: BundlerKind,
    root: PathBuf,
}

impl StaticFilesBackend {
    pub fn new(kind: BundlerKind, root: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            root: root.into(),
        }
    }
}

#[async_trait]
impl BundlerBackend for StaticFilesBackend {
    fn kind(&self) -> BundlerKind {
        self.kind
    }

    async fn start(&self, options: &BundlerStartOptions) -> Result<()> {
        if !self.root.is_dir() {
            return Err(Error::config(format!(
                "{} output directory {} does not exist",
                self.kind,
                self.root.display()
            )));
        }
        if options.reset_cache {
            debug!("{}: nothing cached to reset", self.kind);
        }
        info!("{} serving {}", self.kind, self.root.display());
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    fn router(&self) -> Router {
        Router::new().fallback_service(ServeDir::new(&self.root))
    }
}
