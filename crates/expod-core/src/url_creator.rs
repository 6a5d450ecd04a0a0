//! Server URL and deep-link construction
//!
//! [`UrlCreator`] turns a host type, a port and (for tunnels) the active tunnel
//! URL into the canonical server URL and the URLs derived from it:
//!
//! - `http://192.168.1.5:8081` - the manifest/bundle origin
//! - `exp://192.168.1.5:8081` - the Expo Go deep link
//! - `myapp://expo-development-client/?url=http%3A%2F%2F…` - the dev-client deep link
//! - `http://192.168.1.5:8081/_expo/loading?platform=ios` - the interstitial page
//!
//! Construction is synchronous. The only failure is a tunnel host type with no
//! active tunnel yet: [`UrlCreator::construct_url`] returns `None`, while the
//! deep-link builders return [`Error::TunnelInactive`].

use std::fmt;
use std::sync::Arc;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use crate::error::{Error, Result};
use crate::network::{lan_hostname, LOOPBACK_HOST};
use crate::types::{HostType, LocationOptions, Platform};

/// Host used in dev-client deep links
pub const DEV_CLIENT_HOST: &str = "expo-development-client";

/// Path of the interstitial loading page
pub const LOADING_PAGE_PATH: &str = "/_expo/loading";

/// Scheme Expo Go registers for project URLs
pub const EXPO_GO_SCHEME: &str = "exp";

/// Characters left unescaped by JavaScript's `encodeURIComponent`
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encode a URL component the way `encodeURIComponent` does
pub fn encode_uri_component(input: &str) -> String {
    utf8_percent_encode(input, URI_COMPONENT).to_string()
}

/// Returns the currently active tunnel URL, if any
pub type TunnelUrlGetter = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Per-call overrides; unset fields fall back to the creator's defaults
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlOverrides {
    pub scheme: Option<String>,
    pub hostname: Option<String>,
}

impl UrlOverrides {
    pub fn scheme(scheme: impl Into<String>) -> Self {
        Self {
            scheme: Some(scheme.into()),
            hostname: None,
        }
    }
}

/// Builds URLs for one bound dev server
#[derive(Clone)]
pub struct UrlCreator {
    defaults: LocationOptions,
    port: u16,
    lan_host: String,
    tunnel_url: Option<TunnelUrlGetter>,
}

impl fmt::Debug for UrlCreator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlCreator")
            .field("defaults", &self.defaults)
            .field("port", &self.port)
            .field("lan_host", &self.lan_host)
            .field("has_tunnel", &self.tunnel_url.is_some())
            .finish()
    }
}

impl UrlCreator {
    /// Create a URL creator for a server bound to `port`
    pub fn new(defaults: LocationOptions, port: u16, tunnel_url: Option<TunnelUrlGetter>) -> Self {
        let lan_host = match defaults.host_type {
            HostType::Lan => lan_hostname(),
            _ => LOOPBACK_HOST.to_string(),
        };
        Self {
            defaults,
            port,
            lan_host,
            tunnel_url,
        }
    }

    /// Pin the LAN host instead of resolving it from the machine
    pub fn with_lan_host(mut self, host: impl Into<String>) -> Self {
        self.lan_host = host.into();
        self
    }

    pub fn host_type(&self) -> HostType {
        self.defaults.host_type
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Tunnels are served over TLS by the provider
    fn http_protocol(&self) -> &'static str {
        match self.defaults.host_type {
            HostType::Tunnel => "https",
            _ => "http",
        }
    }

    /// Host devices should connect to, or `None` when the tunnel is not up yet
    fn default_host(&self) -> Option<String> {
        match self.defaults.host_type {
            HostType::Lan => Some(self.lan_host.clone()),
            HostType::Localhost => Some(LOOPBACK_HOST.to_string()),
            HostType::Tunnel => {
                let tunnel_url = self.tunnel_url.as_ref().and_then(|getter| getter())?;
                Url::parse(&tunnel_url)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string))
            }
        }
    }

    /// Canonical server URL, e.g. `http://192.168.1.5:8081`.
    ///
    /// Returns `None` for a tunnel host type without an active tunnel.
    pub fn construct_url(&self, overrides: &UrlOverrides) -> Option<String> {
        let scheme = overrides.scheme.as_deref().unwrap_or("http");

        if let Some(hostname) = &overrides.hostname {
            return Some(format!("{}://{}:{}", scheme, hostname, self.port));
        }

        let host = self.default_host()?;
        if self.defaults.host_type == HostType::Tunnel {
            // Tunnels terminate on the provider's default port
            Some(format!("{}://{}", scheme, host))
        } else {
            Some(format!("{}://{}:{}", scheme, host, self.port))
        }
    }

    /// HTTP(S) URL of the interstitial loading page for `platform`
    pub fn construct_loading_url(
        &self,
        platform: Platform,
        overrides: &UrlOverrides,
    ) -> Result<String> {
        let protocol = self.http_protocol();
        let base = self
            .construct_url(&UrlOverrides {
                scheme: Some(protocol.to_string()),
                hostname: overrides.hostname.clone(),
            })
            .ok_or(Error::TunnelInactive)?;

        let mut url = Url::parse(&base)
            .map_err(|e| Error::config(format!("Invalid server URL {base}: {e}")))?;
        url.set_path(LOADING_PAGE_PATH);
        url.query_pairs_mut()
            .append_pair("platform", platform.as_str());
        Ok(url.to_string())
    }

    /// Dev-client deep link wrapping the manifest URL,
    /// e.g. `myapp://expo-development-client/?url=http%3A%2F%2F192.168.1.5%3A8081`
    pub fn construct_dev_client_url(&self, overrides: &UrlOverrides) -> Result<String> {
        let scheme = overrides
            .scheme
            .clone()
            .or_else(|| self.defaults.scheme.clone())
            .ok_or_else(|| {
                Error::usage("No scheme specified for development client. Pass --scheme <scheme>.")
            })?;

        let protocol = self.http_protocol();
        let manifest_url = self
            .construct_url(&UrlOverrides {
                scheme: Some(protocol.to_string()),
                hostname: overrides.hostname.clone(),
            })
            .ok_or(Error::TunnelInactive)?;

        Ok(format!(
            "{}://{}/?url={}",
            scheme,
            DEV_CLIENT_HOST,
            encode_uri_component(&manifest_url)
        ))
    }

    /// Deep link a native runtime should open.
    ///
    /// Dev clients get the wrapped `expo-development-client` form; Expo Go opens
    /// the server URL itself with `exp://` in place of `http://`.
    pub fn construct_deep_link(&self, dev_client: bool, overrides: &UrlOverrides) -> Result<String> {
        if dev_client {
            self.construct_dev_client_url(overrides)
        } else {
            let scheme = overrides
                .scheme
                .clone()
                .unwrap_or_else(|| EXPO_GO_SCHEME.to_string());
            self.construct_url(&UrlOverrides {
                scheme: Some(scheme),
                hostname: overrides.hostname.clone(),
            })
            .ok_or(Error::TunnelInactive)
        }
    }
}
