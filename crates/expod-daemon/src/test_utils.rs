//! Test doubles for tunnel providers, native bridges and platform managers
//!
//! Enabled with the `test-helpers` feature so downstream crates can drive the
//! dev server without spawning ngrok, adb or simctl.
//!
//! # Example
//!
//! ```ignore
//! use expod_daemon::test_utils::{CallLog, FakePlatformManager};
//!
//! let log = CallLog::default();
//! let android = FakePlatformManager::opened(RuntimeTarget::Emulator, log.clone());
//! // ... open a platform ...
//! assert_eq!(log.calls(), vec!["emulator"]);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use expod_core::prelude::*;
use expod_core::RuntimeTarget;

use crate::native_bridge::NativeBridge;
use crate::platforms::{LaunchOutcome, OpenOptions, PlatformManager};
use crate::tunnel::{TunnelProvider, TunnelRequest};

/// Shared, ordered record of calls across fakes
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, call: impl Into<String>) {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

type ConnectResult = std::result::Result<String, String>;

/// Tunnel provider that replays scripted results, then succeeds
#[derive(Debug, Default)]
pub struct FakeTunnelProvider {
    script: Mutex<VecDeque<ConnectResult>>,
    connects: AtomicUsize,
    kills: AtomicUsize,
    requests: Mutex<Vec<TunnelRequest>>,
}

impl FakeTunnelProvider {
    /// Always connects to `https://{hostname}`
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with a tunnel error per entry before succeeding
    pub fn failing(messages: &[&str]) -> Self {
        let provider = Self::default();
        provider
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(messages.iter().map(|m| Err(m.to_string())));
        provider
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TunnelRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl TunnelProvider for FakeTunnelProvider {
    async fn connect(&self, request: &TunnelRequest) -> Result<String> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(Err(message)) => Err(Error::tunnel(message)),
            Some(Ok(url)) => Ok(url),
            None => Ok(format!("https://{}", request.hostname)),
        }
    }

    async fn kill(&self) -> Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Native bridge that records calls and optionally fails to start
#[derive(Debug, Default)]
pub struct FakeNativeBridge {
    pub fail_start: bool,
    log: CallLog,
}

impl FakeNativeBridge {
    pub fn new(log: CallLog) -> Self {
        Self {
            fail_start: false,
            log,
        }
    }

    pub fn failing(log: CallLog) -> Self {
        Self {
            fail_start: true,
            log,
        }
    }
}

#[async_trait]
impl NativeBridge for FakeNativeBridge {
    async fn start_reverse(&self, port: u16) -> Result<()> {
        self.log.push(format!("reverse:{}", port));
        if self.fail_start {
            return Err(Error::native_bridge("adb reverse failed"));
        }
        Ok(())
    }

    async fn stop_reverse(&self, port: u16) -> Result<()> {
        self.log.push(format!("unreverse:{}", port));
        Ok(())
    }
}

/// What a [`FakePlatformManager`] does when asked to open
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    Open,
    Abort,
    Fail(String),
}

/// Platform manager that records each open in a [`CallLog`]
#[derive(Debug)]
pub struct FakePlatformManager {
    runtime: RuntimeTarget,
    behavior: FakeBehavior,
    log: CallLog,
    urls: Mutex<Vec<String>>,
}

impl FakePlatformManager {
    pub fn new(runtime: RuntimeTarget, behavior: FakeBehavior, log: CallLog) -> Self {
        Self {
            runtime,
            behavior,
            log,
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn opened(runtime: RuntimeTarget, log: CallLog) -> Self {
        Self::new(runtime, FakeBehavior::Open, log)
    }

    /// URLs this manager was asked to open
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

fn runtime_name(runtime: RuntimeTarget) -> &'static str {
    match runtime {
        RuntimeTarget::Simulator => "simulator",
        RuntimeTarget::Emulator => "emulator",
        RuntimeTarget::Desktop => "desktop",
    }
}

#[async_trait]
impl PlatformManager for FakePlatformManager {
    fn runtime(&self) -> RuntimeTarget {
        self.runtime
    }

    async fn open(&self, url: &str, _options: &OpenOptions) -> Result<LaunchOutcome> {
        self.log.push(runtime_name(self.runtime));
        self.urls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.to_string());

        match &self.behavior {
            FakeBehavior::Open => Ok(LaunchOutcome::Opened {
                url: url.to_string(),
                device: format!("fake-{}", runtime_name(self.runtime)),
            }),
            FakeBehavior::Abort => Ok(LaunchOutcome::Aborted),
            FakeBehavior::Fail(message) => Err(Error::platform(
                self.runtime.platform().as_str(),
                message.clone(),
            )),
        }
    }
}
