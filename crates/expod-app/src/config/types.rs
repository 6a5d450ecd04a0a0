//! Configuration types for expod
//!
//! Defines `Settings` (`.expod/config.toml`) and its sections.

use std::path::Path;
use std::time::Duration;

use expod_core::ProjectInfo;
use expod_daemon::TunnelConfig;
use serde::{Deserialize, Serialize};

/// Application settings (.expod/config.toml)
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub project: ProjectSettings,

    #[serde(default)]
    pub tunnel: TunnelSettings,

    #[serde(default)]
    pub dev_session: DevSessionSettings,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub watcher: WatcherSettings,
}

/// Project identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProjectSettings {
    /// URL slug (defaults to the slugified directory name)
    #[serde(default)]
    pub slug: Option<String>,

    /// Display name (defaults to the directory name)
    #[serde(default)]
    pub name: Option<String>,

    /// Account that owns the project (anonymous if unset)
    #[serde(default)]
    pub owner: Option<String>,

    /// Custom dev-client scheme
    #[serde(default)]
    pub scheme: Option<String>,
}

impl ProjectSettings {
    /// Project info for `root` with these settings applied
    pub fn project_info(&self, root: &Path) -> ProjectInfo {
        let mut info = ProjectInfo::from_root(root);
        if let Some(name) = &self.name {
            info.name = name.clone();
        }
        if let Some(slug) = &self.slug {
            info.slug = expod_core::slugify(slug);
        }
        info.owner = self.owner.clone().filter(|o| !o.is_empty());
        info.scheme = self.scheme.clone().filter(|s| !s.is_empty());
        info
    }
}

/// Tunnel settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TunnelSettings {
    #[serde(default = "default_tunnel_domain")]
    pub domain: String,

    /// Tunnel agent executable
    #[serde(default = "default_tunnel_binary")]
    pub binary: String,

    /// Per-attempt connect timeout in milliseconds
    #[serde(default = "default_tunnel_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Provider error codes that trigger a new hostname
    #[serde(default = "default_collision_codes")]
    pub collision_codes: Vec<String>,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            domain: default_tunnel_domain(),
            binary: default_tunnel_binary(),
            timeout_ms: default_tunnel_timeout_ms(),
            max_attempts: default_max_attempts(),
            collision_codes: default_collision_codes(),
        }
    }
}

impl TunnelSettings {
    pub fn to_tunnel_config(&self) -> TunnelConfig {
        TunnelConfig {
            domain: self.domain.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
            max_attempts: self.max_attempts,
            collision_codes: self.collision_codes.clone(),
        }
    }
}

fn default_tunnel_domain() -> String {
    expod_daemon::tunnel::DEFAULT_TUNNEL_DOMAIN.to_string()
}

fn default_tunnel_binary() -> String {
    "ngrok".to_string()
}

fn default_tunnel_timeout_ms() -> u64 {
    expod_daemon::tunnel::DEFAULT_TUNNEL_TIMEOUT.as_millis() as u64
}

fn default_max_attempts() -> u32 {
    expod_daemon::tunnel::DEFAULT_MAX_ATTEMPTS
}

fn default_collision_codes() -> Vec<String> {
    TunnelConfig::default().collision_codes
}

/// Dev session heartbeat settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DevSessionSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

impl Default for DevSessionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            endpoint: default_endpoint(),
        }
    }
}

fn default_interval_secs() -> u64 {
    20
}

fn default_endpoint() -> String {
    "https://exp.host/--/api/v2/development-sessions".to_string()
}

/// Port settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerSettings {
    #[serde(default = "default_native_port")]
    pub native_port: u16,

    #[serde(default = "default_web_port")]
    pub web_port: u16,

    /// How many ports above the default to try
    #[serde(default = "default_port_probe_range")]
    pub port_probe_range: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            native_port: default_native_port(),
            web_port: default_web_port(),
            port_probe_range: default_port_probe_range(),
        }
    }
}

fn default_native_port() -> u16 {
    8081
}

fn default_web_port() -> u16 {
    19006
}

fn default_port_probe_range() -> u16 {
    20
}

/// `.env` watcher settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WatcherSettings {
    /// Debounce duration in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.tunnel.domain, "exp.direct");
        assert_eq!(settings.tunnel.timeout_ms, 10_000);
        assert_eq!(settings.tunnel.max_attempts, 3);
        assert_eq!(settings.server.native_port, 8081);
        assert_eq!(settings.server.web_port, 19006);
        assert!(settings.dev_session.enabled);
        assert_eq!(settings.watcher.debounce_ms, 500);
    }

    #[test]
    fn test_tunnel_config_conversion() {
        let tunnel = TunnelSettings {
            timeout_ms: 250,
            ..Default::default()
        };
        let config = tunnel.to_tunnel_config();
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.collision_codes, vec!["ERR_NGROK_334", "103"]);
    }

    #[test]
    fn test_project_info_overrides() {
        let project = ProjectSettings {
            slug: Some("Cool App".to_string()),
            owner: Some("bacon".to_string()),
            scheme: Some(String::new()),
            ..Default::default()
        };
        let info = project.project_info(Path::new("/work/my-app"));
        assert_eq!(info.name, "my-app");
        assert_eq!(info.slug, "cool-app");
        assert_eq!(info.owner.as_deref(), Some("bacon"));
        assert!(info.scheme.is_none());
    }
}
