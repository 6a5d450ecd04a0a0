//! # expod-app - Dev Server Orchestration
//!
//! Runs the dev servers behind `expod start`: binds ports, serves manifests and
//! the message socket, connects tunnels, and opens the app on devices.
//!
//! Depends on [`expod_core`] for domain types and [`expod_daemon`] for tunnels,
//! native bridges and platform managers.
//!
//! ## Public API
//!
//! ### Servers
//! - [`BundlerServer`] - One bundler behind an HTTP server with an optional tunnel
//! - [`DevServerManager`] - Starts, tracks and stops the native and web servers
//! - [`open_platforms`] - Opens Android, iOS and web in order
//!
//! ### Configuration
//! - [`Settings`] - `.expod/config.toml`
//! - [`ProjectSettingsStore`] - `.expo/settings.json` as a key-value store
//!
//! ### Auxiliary
//! - [`EnvWatcher`] - `.env*` loading and reload broadcasts
//! - [`WebSupportPrerequisite`] - Web bundling requirements
//! - [`bootstrap_typescript`] - Default `tsconfig.json`

pub mod config;
pub mod dispatcher;
pub mod env_watcher;
pub mod manager;
pub mod prerequisites;
pub mod server;
pub mod signals;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod typescript;

pub use config::{load_settings, ProjectSettingsStore, Settings};
pub use dispatcher::{open_platforms, PlatformSelection, PlatformsOpened};
pub use env_watcher::{EnvEvent, EnvWatcher};
pub use manager::{DevServerManager, ServerFactory, StartRequest};
pub use prerequisites::{ProjectPrerequisite, WebSupportPrerequisite};
pub use server::{
    BundlerBackend, BundlerServer, BundlerServerDeps, DevSessionSetup, HttpDevSessionClient,
    ManifestType, PortChoice, StaticFilesBackend, TunnelFactory,
};
pub use typescript::{bootstrap_typescript, TypeScriptSetup};

// Re-export daemon types used alongside the dev servers
pub use expod_daemon::{LaunchOutcome, OpenOptions, ToolAvailability};
