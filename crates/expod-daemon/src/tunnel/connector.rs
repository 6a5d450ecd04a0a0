//! Tunnel connection state machine
//!
//! `Idle -> Connecting -> Connected -> Disconnecting -> Idle`, with a
//! `Connecting -> Idle` edge when every attempt fails.
//!
//! Each connect attempt is time-boxed. A timeout or transient provider error
//! uses up one attempt; a provider error classified as an identity collision
//! also regenerates the persisted randomness seed so the next attempt asks for
//! a different hostname. Once the budget is spent the last error is returned.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use expod_core::prelude::*;
use expod_core::{slugify, ProjectInfo, TunnelUrlGetter};
use rand::distributions::Alphanumeric;
use rand::Rng;

use super::provider::{TunnelProvider, TunnelRequest};
use super::store::{KeyValueStore, URL_RANDOMNESS_KEY};
use crate::native_bridge::NativeBridge;

/// Default public domain for project hostnames
pub const DEFAULT_TUNNEL_DOMAIN: &str = "exp.direct";

/// Default time allowed for one connect attempt
pub const DEFAULT_TUNNEL_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect attempts before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Environment variable overriding the per-attempt timeout in milliseconds
pub const TUNNEL_TIMEOUT_ENV: &str = "EXPO_TUNNEL_TIMEOUT_MS";

/// Maximum length of a DNS label
const MAX_LABEL_LEN: usize = 63;

/// Length of a generated randomness seed
const SEED_LEN: usize = 6;

/// Decides whether a provider error means the requested hostname is taken
pub type CollisionPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Tunnel settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    pub domain: String,
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Provider error codes that mean "hostname already in use"
    pub collision_codes: Vec<String>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            domain: DEFAULT_TUNNEL_DOMAIN.to_string(),
            timeout: DEFAULT_TUNNEL_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            collision_codes: vec!["ERR_NGROK_334".to_string(), "103".to_string()],
        }
    }
}

impl TunnelConfig {
    /// Predicate matching errors whose provider code is in `collision_codes`
    pub fn collision_predicate(&self) -> CollisionPredicate {
        let codes = self.collision_codes.clone();
        Arc::new(move |err: &Error| {
            err.tunnel_code()
                .is_some_and(|code| codes.iter().any(|c| c == code))
        })
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TunnelState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

/// Mutable session data owned by the connector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelSession {
    /// URL of the live tunnel; None until a connect succeeds
    pub active_url: Option<String>,
    /// Seed mixed into the hostname, loaded from the project store
    pub randomness_seed: Option<String>,
    /// Attempt number of the current or last connect (1-based)
    pub attempt: u32,
}

/// Per-call connect options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    pub timeout: Duration,
}

#[derive(Debug, Default)]
struct Inner {
    state: TunnelState,
    session: TunnelSession,
    bridged: bool,
}

/// Manages exactly one outbound tunnel for one dev server port
pub struct TunnelConnector {
    port: u16,
    owner: Option<String>,
    slug: String,
    config: TunnelConfig,
    provider: Arc<dyn TunnelProvider>,
    bridge: Option<Arc<dyn NativeBridge>>,
    store: Arc<dyn KeyValueStore>,
    is_collision: CollisionPredicate,
    inner: Arc<RwLock<Inner>>,
}

impl fmt::Debug for TunnelConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelConnector")
            .field("port", &self.port)
            .field("slug", &self.slug)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl TunnelConnector {
    pub fn new(
        project: &ProjectInfo,
        port: u16,
        config: TunnelConfig,
        provider: Arc<dyn TunnelProvider>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let is_collision = config.collision_predicate();
        Self {
            port,
            owner: project.owner.clone(),
            slug: project.slug.clone(),
            config,
            provider,
            bridge: None,
            store,
            is_collision,
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Run `bridge` before connecting; its failure aborts startup
    pub fn with_native_bridge(mut self, bridge: Arc<dyn NativeBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Replace the code-based collision check
    pub fn with_collision_predicate(mut self, predicate: CollisionPredicate) -> Self {
        self.is_collision = predicate;
        self
    }

    pub fn state(&self) -> TunnelState {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn session(&self) -> TunnelSession {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .session
            .clone()
    }

    fn set_state(&self, state: TunnelState) {
        self.inner.write().unwrap_or_else(|e| e.into_inner()).state = state;
    }

    /// Last successfully connected URL. Never blocks on a connect in progress.
    pub fn active_url(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .session
            .active_url
            .clone()
    }

    /// Shareable getter for [`expod_core::UrlCreator`]
    pub fn url_getter(&self) -> TunnelUrlGetter {
        let inner = Arc::clone(&self.inner);
        Arc::new(move || {
            inner
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .session
                .active_url
                .clone()
        })
    }

    /// Bridge native devices, then connect the tunnel
    pub async fn start(&self) -> Result<String> {
        if let Some(bridge) = &self.bridge {
            bridge.start_reverse(self.port).await.map_err(|e| match e {
                Error::NativeBridge { .. } => e,
                other => Error::native_bridge(other.to_string()),
            })?;
            self.inner.write().unwrap_or_else(|e| e.into_inner()).bridged = true;
        }

        self.connect_to_tunnel(ConnectOptions {
            timeout: self.config.timeout,
        })
        .await
    }

    /// Connect with a bounded number of attempts
    pub async fn connect_to_tunnel(&self, options: ConnectOptions) -> Result<String> {
        self.set_state(TunnelState::Connecting);
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = Error::TunnelTimeout;

        for attempt in 1..=max_attempts {
            self.inner
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .session
                .attempt = attempt;

            if attempt > 1 {
                if let Err(e) = self.provider.kill().await {
                    debug!("Failed to kill previous tunnel process: {}", e);
                }
            }

            let hostname = match self.project_hostname().await {
                Ok(hostname) => hostname,
                Err(e) => {
                    self.set_state(TunnelState::Idle);
                    return Err(e);
                }
            };
            let request = TunnelRequest {
                hostname,
                port: self.port,
            };
            debug!(
                "Tunnel attempt {}/{} for {}",
                attempt, max_attempts, request.hostname
            );

            let error = match tokio::time::timeout(options.timeout, self.provider.connect(&request))
                .await
            {
                Ok(Ok(url)) => {
                    let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
                    inner.session.active_url = Some(url.clone());
                    inner.state = TunnelState::Connected;
                    info!("Tunnel ready: {}", url);
                    return Ok(url);
                }
                Ok(Err(e)) => e,
                Err(_) => Error::TunnelTimeout,
            };

            if error.is_fatal() {
                self.set_state(TunnelState::Idle);
                return Err(error);
            }

            if (self.is_collision)(&error) {
                warn!("Tunnel hostname {} is taken, regenerating", request.hostname);
                if let Err(e) = self.reset_project_randomness().await {
                    self.set_state(TunnelState::Idle);
                    return Err(e);
                }
            } else {
                warn!("Tunnel attempt {} failed: {}", attempt, error);
            }
            last_error = error;
        }

        if let Err(e) = self.provider.kill().await {
            debug!("Failed to kill tunnel process after final attempt: {}", e);
        }
        self.set_state(TunnelState::Idle);
        Err(last_error)
    }

    /// Tear down the tunnel and native bridge. Safe to call repeatedly.
    pub async fn stop(&self) -> Result<()> {
        let bridged = {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            if inner.state == TunnelState::Idle
                && inner.session.active_url.is_none()
                && !inner.bridged
            {
                return Ok(());
            }
            inner.state = TunnelState::Disconnecting;
            std::mem::take(&mut inner.bridged)
        };

        let mut failures = Vec::new();
        if let Err(e) = self.provider.kill().await {
            failures.push(format!("tunnel: {}", e));
        }
        if bridged {
            if let Some(bridge) = &self.bridge {
                if let Err(e) = bridge.stop_reverse(self.port).await {
                    failures.push(format!("native bridge: {}", e));
                }
            }
        }

        {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            inner.session.active_url = None;
            inner.state = TunnelState::Idle;
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Teardown { failures })
        }
    }

    /// `{seed}-{owner}-{slug}-{port}.{domain}`, a URL-safe DNS name
    pub async fn project_hostname(&self) -> Result<String> {
        let seed = self.project_randomness().await?;
        let owner = self.owner.as_deref().unwrap_or("anonymous");
        let mut label = slugify(&format!("{}-{}-{}-{}", seed, owner, self.slug, self.port));
        label.truncate(MAX_LABEL_LEN);
        while label.ends_with('-') {
            label.pop();
        }
        Ok(format!("{}.{}", label, self.config.domain))
    }

    /// Persisted seed, generated on first use
    pub async fn project_randomness(&self) -> Result<String> {
        if let Some(seed) = self
            .inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .session
            .randomness_seed
            .clone()
        {
            return Ok(seed);
        }

        match self.store.get(URL_RANDOMNESS_KEY).await? {
            Some(seed) if !seed.is_empty() => {
                self.inner
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .session
                    .randomness_seed = Some(seed.clone());
                Ok(seed)
            }
            _ => self.reset_project_randomness().await,
        }
    }

    /// Generate and persist a new seed
    pub async fn reset_project_randomness(&self) -> Result<String> {
        let seed = generate_seed();
        self.store.set(URL_RANDOMNESS_KEY, &seed).await?;
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .session
            .randomness_seed = Some(seed.clone());
        debug!("New tunnel randomness: {}", seed);
        Ok(seed)
    }
}

fn generate_seed() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SEED_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native_bridge::MockNativeBridge;
    use crate::tunnel::provider::MockTunnelProvider;
    use crate::tunnel::store::MemoryStore;
    use expod_core::encode_uri_component;
    use mockall::Sequence;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn project() -> ProjectInfo {
        let mut project = ProjectInfo::from_root("/work/my-app");
        project.owner = Some("bacon".to_string());
        project
    }

    fn connector(provider: MockTunnelProvider, store: Arc<MemoryStore>) -> TunnelConnector {
        TunnelConnector::new(
            &project(),
            8081,
            TunnelConfig::default(),
            Arc::new(provider),
            store,
        )
    }

    fn quick() -> ConnectOptions {
        ConnectOptions {
            timeout: Duration::from_secs(5),
        }
    }

    /// Provider whose connect never resolves
    struct PendingProvider {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TunnelProvider for PendingProvider {
        async fn connect(&self, _request: &TunnelRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("https://never.exp.direct".to_string())
        }

        async fn kill(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_retry_bound_returns_original_error() {
        let mut provider = MockTunnelProvider::new();
        provider
            .expect_connect()
            .times(3)
            .returning(|_| Err(Error::tunnel("connection refused")));
        provider.expect_kill().returning(|| Ok(()));

        let connector = connector(provider, Arc::new(MemoryStore::new()));
        let err = connector.connect_to_tunnel(quick()).await.unwrap_err();

        match err {
            Error::Tunnel { message, code } => {
                assert_eq!(message, "connection refused");
                assert!(code.is_none());
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(connector.state(), TunnelState::Idle);
        assert_eq!(connector.session().attempt, 3);
        assert!(connector.active_url().is_none());
    }

    #[tokio::test]
    async fn test_collision_reseeds_once_then_succeeds() {
        let mut seq = Sequence::new();
        let mut provider = MockTunnelProvider::new();
        provider
            .expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(Error::tunnel_with_code("already online", "ERR_NGROK_334")));
        provider
            .expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|request| Ok(format!("https://{}", request.hostname)));
        provider.expect_kill().returning(|| Ok(()));

        let store = Arc::new(MemoryStore::with_value(URL_RANDOMNESS_KEY, "seed01"));
        let connector = connector(provider, Arc::clone(&store));
        let before = connector.project_hostname().await.unwrap();

        let url = connector.connect_to_tunnel(quick()).await.unwrap();

        assert_eq!(store.writes(), 1);
        assert_ne!(connector.project_hostname().await.unwrap(), before);
        assert_eq!(connector.active_url(), Some(url));
        assert_eq!(connector.state(), TunnelState::Connected);
    }

    #[tokio::test]
    async fn test_non_collision_error_keeps_seed() {
        let mut seq = Sequence::new();
        let mut provider = MockTunnelProvider::new();
        provider
            .expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(Error::tunnel_with_code("rate limited", "ERR_NGROK_8012")));
        provider
            .expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("https://ok.exp.direct".to_string()));
        provider.expect_kill().returning(|| Ok(()));

        let store = Arc::new(MemoryStore::with_value(URL_RANDOMNESS_KEY, "seed01"));
        let connector = connector(provider, Arc::clone(&store));
        connector.connect_to_tunnel(quick()).await.unwrap();
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn test_custom_collision_predicate() {
        let mut seq = Sequence::new();
        let mut provider = MockTunnelProvider::new();
        provider
            .expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(Error::tunnel("subdomain taken")));
        provider
            .expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("https://ok.exp.direct".to_string()));
        provider.expect_kill().returning(|| Ok(()));

        let store = Arc::new(MemoryStore::with_value(URL_RANDOMNESS_KEY, "seed01"));
        let connector = connector(provider, Arc::clone(&store)).with_collision_predicate(
            Arc::new(|e: &Error| e.to_string().contains("taken")),
        );
        connector.connect_to_tunnel(quick()).await.unwrap();
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_fatal_provider_error_is_not_retried() {
        let mut provider = MockTunnelProvider::new();
        provider.expect_connect().times(1).returning(|_| {
            Err(Error::TunnelUnavailable {
                reason: "ngrok not found".to_string(),
            })
        });
        provider.expect_kill().returning(|| Ok(()));

        let connector = connector(provider, Arc::new(MemoryStore::new()));
        let err = connector.connect_to_tunnel(quick()).await.unwrap_err();
        assert!(matches!(err, Error::TunnelUnavailable { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_does_not_wait_for_provider() {
        let provider = Arc::new(PendingProvider {
            calls: AtomicUsize::new(0),
        });
        let connector = TunnelConnector::new(
            &project(),
            8081,
            TunnelConfig::default(),
            Arc::clone(&provider) as Arc<dyn TunnelProvider>,
            Arc::new(MemoryStore::new()),
        );

        let started = tokio::time::Instant::now();
        let err = connector
            .connect_to_tunnel(ConnectOptions {
                timeout: Duration::from_millis(10),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TunnelTimeout));
        assert!(err.to_string().contains("took too long"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_timeout() {
        let provider = Arc::new(PendingProvider {
            calls: AtomicUsize::new(0),
        });
        let config = TunnelConfig {
            max_attempts: 1,
            ..Default::default()
        };
        let connector = TunnelConnector::new(
            &project(),
            8081,
            config,
            Arc::clone(&provider) as Arc<dyn TunnelProvider>,
            Arc::new(MemoryStore::new()),
        );

        let started = tokio::time::Instant::now();
        let err = connector
            .connect_to_tunnel(ConnectOptions {
                timeout: Duration::from_millis(10),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TunnelTimeout));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() <= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut provider = MockTunnelProvider::new();
        provider
            .expect_connect()
            .returning(|_| Ok("https://ok.exp.direct".to_string()));
        provider.expect_kill().times(1).returning(|| Ok(()));

        let connector = connector(provider, Arc::new(MemoryStore::new()));
        connector.stop().await.unwrap();

        connector.start().await.unwrap();
        assert_eq!(connector.state(), TunnelState::Connected);

        connector.stop().await.unwrap();
        assert_eq!(connector.state(), TunnelState::Idle);
        assert!(connector.active_url().is_none());

        connector.stop().await.unwrap();
        assert_eq!(connector.state(), TunnelState::Idle);
    }

    #[tokio::test]
    async fn test_bridge_failure_is_fatal_and_skips_connect() {
        let mut provider = MockTunnelProvider::new();
        provider.expect_connect().times(0);
        provider.expect_kill().returning(|| Ok(()));

        let mut bridge = MockNativeBridge::new();
        bridge
            .expect_start_reverse()
            .times(1)
            .returning(|_| Err(Error::process("adb: device offline")));

        let connector = connector(provider, Arc::new(MemoryStore::new()))
            .with_native_bridge(Arc::new(bridge));
        let err = connector.start().await.unwrap_err();

        assert!(matches!(err, Error::NativeBridge { .. }));
        assert!(err.is_fatal());
        assert_eq!(connector.state(), TunnelState::Idle);
    }

    #[tokio::test]
    async fn test_stop_removes_bridge_mappings() {
        let mut provider = MockTunnelProvider::new();
        provider
            .expect_connect()
            .returning(|_| Ok("https://ok.exp.direct".to_string()));
        provider.expect_kill().returning(|| Ok(()));

        let mut bridge = MockNativeBridge::new();
        bridge.expect_start_reverse().times(1).returning(|_| Ok(()));
        bridge.expect_stop_reverse().times(1).returning(|_| Ok(()));

        let connector = connector(provider, Arc::new(MemoryStore::new()))
            .with_native_bridge(Arc::new(bridge));
        connector.start().await.unwrap();
        connector.stop().await.unwrap();
        connector.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_collects_failures() {
        let mut provider = MockTunnelProvider::new();
        provider
            .expect_connect()
            .returning(|_| Ok("https://ok.exp.direct".to_string()));
        provider
            .expect_kill()
            .returning(|| Err(Error::process("kill failed")));

        let mut bridge = MockNativeBridge::new();
        bridge.expect_start_reverse().returning(|_| Ok(()));
        bridge
            .expect_stop_reverse()
            .times(1)
            .returning(|_| Err(Error::process("adb gone")));

        let connector = connector(provider, Arc::new(MemoryStore::new()))
            .with_native_bridge(Arc::new(bridge));
        connector.start().await.unwrap();

        match connector.stop().await.unwrap_err() {
            Error::Teardown { failures } => assert_eq!(failures.len(), 2),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(connector.state(), TunnelState::Idle);
    }

    #[tokio::test]
    async fn test_hostname_is_url_safe_and_stable() {
        let store = Arc::new(MemoryStore::new());
        let connector = connector(MockTunnelProvider::new(), Arc::clone(&store));

        let first = connector.project_hostname().await.unwrap();
        let second = connector.project_hostname().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(encode_uri_component(&first), first);
        assert!(first.ends_with(".exp.direct"));
        assert!(first.contains("-bacon-my-app-8081"));
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_hostname_reuses_persisted_seed() {
        let store = Arc::new(MemoryStore::with_value(URL_RANDOMNESS_KEY, "abc123"));
        let connector = connector(MockTunnelProvider::new(), Arc::clone(&store));
        assert_eq!(
            connector.project_hostname().await.unwrap(),
            "abc123-bacon-my-app-8081.exp.direct"
        );
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn test_hostname_label_is_truncated() {
        let mut project = ProjectInfo::from_root("/work/app");
        project.slug = "a".repeat(80);
        let connector = TunnelConnector::new(
            &project,
            8081,
            TunnelConfig::default(),
            Arc::new(MockTunnelProvider::new()),
            Arc::new(MemoryStore::with_value(URL_RANDOMNESS_KEY, "seed01")),
        );

        let hostname = connector.project_hostname().await.unwrap();
        let label = hostname.trim_end_matches(".exp.direct");
        assert!(label.len() <= 63);
        assert!(label.starts_with("seed01-anonymous-"));
    }

    #[tokio::test]
    async fn test_url_getter_tracks_active_url() {
        let mut provider = MockTunnelProvider::new();
        provider
            .expect_connect()
            .returning(|_| Ok("https://live.exp.direct".to_string()));
        provider.expect_kill().returning(|| Ok(()));

        let connector = connector(provider, Arc::new(MemoryStore::new()));
        let getter = connector.url_getter();
        assert!(getter().is_none());

        connector.start().await.unwrap();
        assert_eq!(getter().as_deref(), Some("https://live.exp.direct"));

        connector.stop().await.unwrap();
        assert!(getter().is_none());
    }
}
