//! Configuration: `.expod/config.toml` settings and persisted project state

pub mod project_store;
pub mod settings;
pub mod types;

pub use project_store::ProjectSettingsStore;
pub use settings::{init_config_dir, load_settings};
pub use types::{
    DevSessionSettings, ProjectSettings, ServerSettings, Settings, TunnelSettings,
    WatcherSettings,
};
