//! Expo routes served in front of the bundler
//!
//! - `GET /` and `/index.exp` - project manifest for Expo Go or dev clients
//! - `GET /_expo/loading` - interstitial page that deep-links into the app
//! - `GET /_expo/link` - `307` redirect to the native deep link
//! - `GET /status` - packager liveness probe

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use expod_core::prelude::*;
use expod_core::url_creator::LOADING_PAGE_PATH;
use expod_core::{BundlerStartOptions, HostType, ProjectInfo, UrlCreator, UrlOverrides};
use serde::Deserialize;
use serde_json::{json, Value};

/// Header native clients use to announce their platform
pub const PLATFORM_HEADER: &str = "expo-platform";

/// Redirect endpoint path
pub const LINK_PATH: &str = "/_expo/link";

/// Response body of `GET /status`
pub const STATUS_RUNNING: &str = "packager-status:running";

/// Manifest flavours a dev server can serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManifestType {
    /// Manifest with Expo Go metadata
    #[default]
    ExpoGo,
    /// Expo Updates protocol manifest for dev clients
    ExpoUpdates,
}

impl ManifestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManifestType::ExpoGo => "expo-go",
            ManifestType::ExpoUpdates => "expo-updates",
        }
    }
}

impl fmt::Display for ManifestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ManifestType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "expo-go" => Ok(ManifestType::ExpoGo),
            "expo-updates" => Ok(ManifestType::ExpoUpdates),
            other => Err(Error::UnsupportedManifestType {
                kind: other.to_string(),
            }),
        }
    }
}

/// Everything the routes need from a started server
#[derive(Debug, Clone)]
pub struct RouteContext {
    pub project: ProjectInfo,
    pub url_creator: UrlCreator,
    pub options: BundlerStartOptions,
    pub manifest_type: ManifestType,
}

#[derive(Debug, Default, Deserialize)]
struct PlatformQuery {
    platform: Option<String>,
    runtime: Option<String>,
}

/// Manifest, loading, link and status routes
pub fn expo_routes(context: RouteContext) -> Router {
    Router::new()
        .route("/", get(manifest_handler))
        .route("/index.exp", get(manifest_handler))
        .route(LOADING_PAGE_PATH, get(loading_handler))
        .route(LINK_PATH, get(link_handler))
        .route("/status", get(status_handler))
        .with_state(Arc::new(context))
}

/// Router for just the manifest endpoints
pub fn manifest_routes(context: RouteContext) -> Router {
    Router::new()
        .route("/", get(manifest_handler))
        .route("/index.exp", get(manifest_handler))
        .with_state(Arc::new(context))
}

async fn status_handler() -> &'static str {
    STATUS_RUNNING
}

/// Platform from the `expo-platform` header, else the `platform` query
fn requested_platform(headers: &HeaderMap, query: &PlatformQuery) -> Option<String> {
    headers
        .get(PLATFORM_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| query.platform.clone())
        .map(|p| p.to_ascii_lowercase())
}

/// Host the client used to reach us, without the port
fn request_hostname(headers: &HeaderMap) -> Option<String> {
    let host = headers.get(header::HOST)?.to_str().ok()?;
    let hostname = match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    };
    (!hostname.is_empty()).then(|| hostname.to_string())
}

impl RouteContext {
    /// Overrides that keep URLs on the address the client connected to
    fn overrides_for(&self, headers: &HeaderMap) -> UrlOverrides {
        let hostname = match self.url_creator.host_type() {
            HostType::Tunnel => None,
            _ => request_hostname(headers),
        };
        UrlOverrides {
            scheme: None,
            hostname,
        }
    }

    fn http_base(&self, hostname: Option<String>) -> Result<String> {
        let scheme = match self.url_creator.host_type() {
            HostType::Tunnel => "https",
            _ => "http",
        };
        self.url_creator
            .construct_url(&UrlOverrides {
                scheme: Some(scheme.to_string()),
                hostname,
            })
            .ok_or(Error::TunnelInactive)
    }

    /// Manifest document for `platform`
    pub fn manifest(&self, platform: &str, hostname: Option<String>) -> Result<Value> {
        let base = self.http_base(hostname)?;
        let host_uri = base
            .split_once("://")
            .map(|(_, rest)| rest.to_string())
            .unwrap_or_else(|| base.clone());
        let dev = self.options.mode.is_dev();
        let bundle_url = format!(
            "{}/index.bundle?platform={}&dev={}&hot=false&minify={}",
            base, platform, dev, self.options.minify
        );

        let mut expo_client = json!({
            "name": self.project.name,
            "slug": self.project.slug,
            "hostUri": host_uri,
        });
        if let Some(scheme) = &self.project.scheme {
            expo_client["scheme"] = json!(scheme);
        }

        let mut extra = json!({
            "eas": {},
            "expoClient": expo_client,
        });
        if self.manifest_type == ManifestType::ExpoGo {
            extra["expoGo"] = json!({
                "debuggerHost": host_uri,
                "developer": {
                    "tool": "expo-cli",
                    "projectRoot": self.project.root.display().to_string(),
                },
                "packagerOpts": { "dev": dev },
                "mainModuleName": "index",
            });
        }

        Ok(json!({
            "id": uuid::Uuid::new_v4().to_string(),
            "createdAt": chrono::Utc::now().to_rfc3339(),
            "runtimeVersion": "exposdk:UNVERSIONED",
            "launchAsset": {
                "key": "bundle",
                "contentType": "application/javascript",
                "url": bundle_url,
            },
            "assets": [],
            "metadata": {},
            "extra": extra,
        }))
    }

    /// Deep link for `runtime` ("expo" or "custom"), defaulting to the server's mode
    pub fn deep_link(&self, runtime: Option<&str>, hostname: Option<String>) -> Result<String> {
        let dev_client = match runtime {
            Some("custom") => true,
            Some("expo") => false,
            Some(other) => {
                return Err(Error::usage(format!(
                    "Unknown runtime \"{}\". Expected expo or custom.",
                    other
                )))
            }
            None => self.options.dev_client,
        };
        self.url_creator.construct_deep_link(
            dev_client,
            &UrlOverrides {
                scheme: None,
                hostname,
            },
        )
    }
}

fn error_response(status: StatusCode, err: &Error) -> Response {
    (status, err.to_string()).into_response()
}

fn status_for(err: &Error) -> StatusCode {
    if err.is_usage() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn manifest_handler(
    State(context): State<Arc<RouteContext>>,
    headers: HeaderMap,
    Query(query): Query<PlatformQuery>,
) -> Response {
    let Some(platform) = requested_platform(&headers, &query) else {
        return (
            StatusCode::BAD_REQUEST,
            "Must specify \"expo-platform\" header or \"platform\" query parameter",
        )
            .into_response();
    };
    if platform != "ios" && platform != "android" {
        return (
            StatusCode::BAD_REQUEST,
            format!("Unsupported platform \"{}\"", platform),
        )
            .into_response();
    }

    let overrides = context.overrides_for(&headers);
    match context.manifest(&platform, overrides.hostname) {
        Ok(manifest) => {
            let mut response = Json(manifest).into_response();
            let headers = response.headers_mut();
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static("private, max-age=0"),
            );
            if context.manifest_type == ManifestType::ExpoUpdates {
                headers.insert("expo-protocol-version", HeaderValue::from_static("0"));
                headers.insert("expo-sfv-version", HeaderValue::from_static("0"));
            }
            response
        }
        Err(e) => error_response(status_for(&e), &e),
    }
}

async fn link_handler(
    State(context): State<Arc<RouteContext>>,
    headers: HeaderMap,
    Query(query): Query<PlatformQuery>,
) -> Response {
    let overrides = context.overrides_for(&headers);
    match context.deep_link(query.runtime.as_deref(), overrides.hostname) {
        Ok(link) => Redirect::temporary(&link).into_response(),
        Err(e) => error_response(status_for(&e), &e),
    }
}

async fn loading_handler(
    State(context): State<Arc<RouteContext>>,
    headers: HeaderMap,
    Query(query): Query<PlatformQuery>,
) -> Response {
    let platform = requested_platform(&headers, &query).unwrap_or_else(|| "ios".to_string());
    let overrides = context.overrides_for(&headers);
    match context.deep_link(query.runtime.as_deref(), overrides.hostname) {
        Ok(link) => Html(loading_page(&context.project.name, &platform, &link)).into_response(),
        Err(e) => error_response(status_for(&e), &e),
    }
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Interstitial HTML that forwards the browser to `link`
pub fn loading_page(app_name: &str, platform: &str, link: &str) -> String {
    let name = escape_html(app_name);
    let href = escape_html(link);
    // JSON string literal; `</` is escaped so it cannot close the script tag
    let script_link = Value::String(link.to_string())
        .to_string()
        .replace("</", "<\\/");
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{name}</title>
</head>
<body>
<h1>Opening {name} on {platform}</h1>
<p><a href="{href}">Tap here if the app does not open</a></p>
<script>window.location.href = {script_link};</script>
</body>
</html>
"#,
        name = name,
        platform = escape_html(platform),
        href = href,
        script_link = script_link,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use expod_core::LocationOptions;

    fn context(manifest_type: ManifestType, dev_client: bool) -> RouteContext {
        let mut project = ProjectInfo::from_root("/work/my-app");
        project.scheme = Some("myapp".to_string());
        let location = LocationOptions {
            host_type: HostType::Lan,
            scheme: Some("myapp".to_string()),
        };
        RouteContext {
            project,
            url_creator: UrlCreator::new(location.clone(), 8081, None)
                .with_lan_host("192.168.1.5"),
            options: BundlerStartOptions {
                dev_client,
                location,
                ..Default::default()
            },
            manifest_type,
        }
    }

    #[test]
    fn test_manifest_type_parse() {
        assert_eq!(
            "expo-go".parse::<ManifestType>().unwrap(),
            ManifestType::ExpoGo
        );
        assert_eq!(
            "expo-updates".parse::<ManifestType>().unwrap(),
            ManifestType::ExpoUpdates
        );
        let err = "classic".parse::<ManifestType>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedManifestType { .. }));
    }

    #[test]
    fn test_expo_go_manifest() {
        let manifest = context(ManifestType::ExpoGo, false)
            .manifest("ios", None)
            .unwrap();

        assert_eq!(
            manifest["launchAsset"]["url"],
            "http://192.168.1.5:8081/index.bundle?platform=ios&dev=true&hot=false&minify=false"
        );
        assert_eq!(manifest["extra"]["expoClient"]["slug"], "my-app");
        assert_eq!(manifest["extra"]["expoClient"]["hostUri"], "192.168.1.5:8081");
        assert_eq!(manifest["extra"]["expoGo"]["debuggerHost"], "192.168.1.5:8081");
        assert_eq!(manifest["extra"]["expoGo"]["packagerOpts"]["dev"], true);
        assert!(manifest["id"].as_str().is_some());
    }

    #[test]
    fn test_expo_updates_manifest_omits_expo_go() {
        let manifest = context(ManifestType::ExpoUpdates, true)
            .manifest("android", Some("10.0.2.2".to_string()))
            .unwrap();
        assert!(manifest["extra"].get("expoGo").is_none());
        assert_eq!(manifest["extra"]["expoClient"]["hostUri"], "10.0.2.2:8081");
    }

    #[test]
    fn test_deep_link_runtime_selection() {
        let context = context(ManifestType::ExpoGo, false);
        assert_eq!(
            context.deep_link(None, None).unwrap(),
            "exp://192.168.1.5:8081"
        );
        assert!(context
            .deep_link(Some("custom"), None)
            .unwrap()
            .starts_with("myapp://expo-development-client/?url="));
        assert!(context.deep_link(Some("desktop"), None).unwrap_err().is_usage());
    }

    #[test]
    fn test_requested_platform_prefers_header() {
        let mut headers = HeaderMap::new();
        headers.insert(PLATFORM_HEADER, HeaderValue::from_static("Android"));
        let query = PlatformQuery {
            platform: Some("ios".to_string()),
            runtime: None,
        };
        assert_eq!(
            requested_platform(&headers, &query).as_deref(),
            Some("android")
        );
        assert_eq!(
            requested_platform(&HeaderMap::new(), &query).as_deref(),
            Some("ios")
        );
        assert_eq!(
            requested_platform(&HeaderMap::new(), &PlatformQuery::default()),
            None
        );
    }

    #[test]
    fn test_request_hostname_strips_port() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("10.0.2.2:8081"));
        assert_eq!(request_hostname(&headers).as_deref(), Some("10.0.2.2"));

        headers.insert(header::HOST, HeaderValue::from_static("localhost"));
        assert_eq!(request_hostname(&headers).as_deref(), Some("localhost"));
    }

    #[test]
    fn test_loading_page_escapes() {
        let html = loading_page("<App>", "ios", "exp://host:8081?a=1&b=</script>");
        assert!(html.contains("Opening &lt;App&gt; on ios"));
        assert!(html.contains("href=\"exp://host:8081?a=1&amp;b=&lt;/script&gt;\""));
        assert!(!html.contains("b=</script>"));
    }
}
