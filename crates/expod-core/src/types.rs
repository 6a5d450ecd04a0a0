//! Domain types shared across expod crates

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// How a dev server is reached from devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostType {
    /// Machine's LAN IPv4 address
    #[default]
    Lan,
    /// Public tunnel URL
    Tunnel,
    /// Loopback only
    Localhost,
}

impl HostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostType::Lan => "lan",
            HostType::Tunnel => "tunnel",
            HostType::Localhost => "localhost",
        }
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lan" => Ok(HostType::Lan),
            "tunnel" => Ok(HostType::Tunnel),
            "localhost" => Ok(HostType::Localhost),
            other => Err(Error::usage(format!(
                "Invalid host type \"{other}\". Expected one of: lan, tunnel, localhost"
            ))),
        }
    }
}

/// Bundler backend kinds a manager can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BundlerKind {
    /// JS bundler serving native runtimes (metro)
    Native,
    /// Web bundler serving browsers (webpack)
    Web,
}

impl BundlerKind {
    pub fn name(&self) -> &'static str {
        match self {
            BundlerKind::Native => "metro",
            BundlerKind::Web => "webpack",
        }
    }
}

impl fmt::Display for BundlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bundle mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Development,
    Production,
}

impl Mode {
    pub fn is_dev(&self) -> bool {
        matches!(self, Mode::Development)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Development => write!(f, "development"),
            Mode::Production => write!(f, "production"),
        }
    }
}

/// Where a server should be reachable and which deep-link scheme it advertises
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocationOptions {
    pub host_type: HostType,
    /// Custom scheme for dev-client deep links (None = Expo Go)
    pub scheme: Option<String>,
}

/// Options passed once to `BundlerServer::start`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BundlerStartOptions {
    pub mode: Mode,
    pub dev_client: bool,
    pub https: bool,
    pub max_workers: Option<usize>,
    pub minify: bool,
    pub reset_cache: bool,
    pub location: LocationOptions,
    /// Explicitly requested port (must be free); None = probe from default
    pub port: Option<u16>,
}

/// URL protocol a server answers on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a started server is bound. Immutable once bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLocation {
    pub url: String,
    pub port: u16,
    pub protocol: Protocol,
    pub host: String,
}

impl ServerLocation {
    pub fn new(protocol: Protocol, host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            url: format!("{}://{}:{}", protocol, host, port),
            port,
            protocol,
            host,
        }
    }
}

/// Platforms a user can ask `start` to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Ios,
    Android,
    Web,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Web => "web",
        }
    }

    /// Runtime target used to open this platform
    pub fn runtime(&self) -> RuntimeTarget {
        match self {
            Platform::Ios => RuntimeTarget::Simulator,
            Platform::Android => RuntimeTarget::Emulator,
            Platform::Web => RuntimeTarget::Desktop,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            "web" => Ok(Platform::Web),
            other => Err(Error::usage(format!("Unknown platform \"{other}\""))),
        }
    }
}

/// Runtime a dev server can launch its app in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeTarget {
    /// iOS simulator or device
    Simulator,
    /// Android emulator or device
    Emulator,
    /// Desktop browser
    Desktop,
}

impl RuntimeTarget {
    pub fn platform(&self) -> Platform {
        match self {
            RuntimeTarget::Simulator => Platform::Ios,
            RuntimeTarget::Emulator => Platform::Android,
            RuntimeTarget::Desktop => Platform::Web,
        }
    }

    pub fn is_native(&self) -> bool {
        !matches!(self, RuntimeTarget::Desktop)
    }
}

/// Project identity used for manifests, tunnel hostnames and dev sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    pub root: std::path::PathBuf,
    pub name: String,
    pub slug: String,
    /// Account that owns the project; None = anonymous
    pub owner: Option<String>,
    /// Dev-client scheme from project config
    pub scheme: Option<String>,
}

impl ProjectInfo {
    /// Build project info from a root directory, deriving name and slug from it
    pub fn from_root(root: impl Into<std::path::PathBuf>) -> Self {
        let root = root.into();
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "app".to_string());
        Self {
            slug: slugify(&name),
            name,
            root,
            owner: None,
            scheme: None,
        }
    }
}

/// Lowercase, URL-safe form of `input`: `[a-z0-9-]`, no leading/trailing dashes
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut last_dash = true;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
