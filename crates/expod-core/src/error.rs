//! Application error types with rich context

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {message}")]
    Http { message: String },

    #[error("Process error: {message}")]
    Process { message: String },

    #[error("Failed to spawn {program}: {reason}")]
    ProcessSpawn { program: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // Usage Errors (never retried)
    // ─────────────────────────────────────────────────────────────
    #[error("{message}")]
    Usage { message: String },

    #[error("Dev server is not running. Start it before calling {operation}.")]
    DevServerNotRunning { operation: String },

    #[error("Manifest middleware type \"{kind}\" is not supported")]
    UnsupportedManifestType { kind: String },

    #[error("Port {port} is already in use")]
    PortInUse { port: u16 },

    // ─────────────────────────────────────────────────────────────
    // Tunnel Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Tunnel error: {message}")]
    Tunnel {
        message: String,
        /// Provider-specific error code, used to detect identity collisions
        code: Option<String>,
    },

    #[error("Tunnel took too long to connect")]
    TunnelTimeout,

    #[error("Tunnel is not active yet")]
    TunnelInactive,

    #[error("Tunnel support is not available: {reason}")]
    TunnelUnavailable { reason: String },

    #[error("Cannot start tunnel: {message}")]
    NativeBridge { message: String },

    // ─────────────────────────────────────────────────────────────
    // Project / Prerequisite Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Project prerequisite \"{name}\" failed: {message}")]
    Prerequisite { name: String, message: String },

    #[error("No project found in: {path}")]
    NoProject { path: PathBuf },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ─────────────────────────────────────────────────────────────
    // Platform Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to open {platform}: {message}")]
    Platform { platform: String, message: String },

    // ─────────────────────────────────────────────────────────────
    // Aggregate Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to start {}: {}", failed_names(.failed), failed_messages(.failed))]
    PartialStart {
        /// Bundlers that started and are still running
        started: Vec<String>,
        /// Bundler name and failure message for each failed start
        failed: Vec<(String, String)>,
    },

    #[error("Errors while stopping: {}", .failures.join("; "))]
    Teardown { failures: Vec<String> },
}

fn failed_names(failed: &[(String, String)]) -> String {
    failed
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn failed_messages(failed: &[(String, String)]) -> String {
    failed
        .iter()
        .map(|(name, message)| format!("{name}: {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    pub fn http(message: impl Into<String>) -> Self {
        Self::Http {
            message: message.into(),
        }
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::Process {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn not_running(operation: impl Into<String>) -> Self {
        Self::DevServerNotRunning {
            operation: operation.into(),
        }
    }

    pub fn tunnel(message: impl Into<String>) -> Self {
        Self::Tunnel {
            message: message.into(),
            code: None,
        }
    }

    pub fn tunnel_with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Tunnel {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    pub fn native_bridge(message: impl Into<String>) -> Self {
        Self::NativeBridge {
            message: message.into(),
        }
    }

    pub fn prerequisite(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Prerequisite {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn platform(platform: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Platform {
            platform: platform.into(),
            message: message.into(),
        }
    }

    /// Provider error code attached to a tunnel failure, if any
    pub fn tunnel_code(&self) -> Option<&str> {
        match self {
            Error::Tunnel { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Bad or contradictory input; fail fast and never retry
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Error::Usage { .. }
                | Error::DevServerNotRunning { .. }
                | Error::UnsupportedManifestType { .. }
                | Error::PortInUse { .. }
        )
    }

    /// Errors the tunnel connector retries within its attempt budget
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Tunnel { .. } | Error::TunnelTimeout)
    }

    /// Check if this error should terminate the `start` session
    pub fn is_fatal(&self) -> bool {
        self.is_usage()
            || matches!(
                self,
                Error::NativeBridge { .. }
                    | Error::TunnelUnavailable { .. }
                    | Error::NoProject { .. }
                    | Error::Prerequisite { .. }
            )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
