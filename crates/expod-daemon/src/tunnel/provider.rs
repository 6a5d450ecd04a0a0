//! Tunnel provider seam and the ngrok process implementation

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;

use async_trait::async_trait;
use expod_core::prelude::*;
use regex::Regex;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

/// Matches provider error codes such as `ERR_NGROK_334`
static NGROK_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ERR_NGROK_\d+").expect("Invalid ngrok code regex"));

/// What a tunnel should expose
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRequest {
    /// Public hostname requested from the provider
    pub hostname: String,
    /// Local port to forward to
    pub port: u16,
}

/// An external service that can expose a local port publicly
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// Open a tunnel and return its public URL
    async fn connect(&self, request: &TunnelRequest) -> Result<String>;

    /// Tear down any tunnel this provider opened
    async fn kill(&self) -> Result<()>;
}

/// Runs the `ngrok` agent as a child process
pub struct NgrokProvider {
    binary: PathBuf,
    child: Mutex<Option<Child>>,
}

impl NgrokProvider {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            child: Mutex::new(None),
        }
    }

    fn args(request: &TunnelRequest) -> Vec<String> {
        vec![
            "http".to_string(),
            request.port.to_string(),
            format!("--url=https://{}", request.hostname),
            "--log=stdout".to_string(),
            "--log-format=json".to_string(),
        ]
    }
}

#[async_trait]
impl TunnelProvider for NgrokProvider {
    async fn connect(&self, request: &TunnelRequest) -> Result<String> {
        let mut guard = self.child.lock().await;
        if let Some(mut previous) = guard.take() {
            let _ = previous.kill().await;
        }

        debug!("Spawning {} {:?}", self.binary.display(), Self::args(request));
        let mut child = Command::new(&self.binary)
            .args(Self::args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::TunnelUnavailable {
                        reason: format!("{} not found on PATH", self.binary.display()),
                    }
                } else {
                    Error::ProcessSpawn {
                        program: self.binary.display().to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::process("ngrok stdout was not captured"))?;
        let mut lines = BufReader::new(stdout).lines();

        while let Some(line) = lines.next_line().await? {
            trace!("ngrok: {}", line);
            match parse_log_line(&line) {
                LogEvent::Started(url) => {
                    // Keep draining so the agent never blocks on a full pipe
                    tokio::spawn(async move {
                        while let Ok(Some(line)) = lines.next_line().await {
                            trace!("ngrok: {}", line);
                        }
                    });
                    *guard = Some(child);
                    return Ok(url);
                }
                LogEvent::Failed { message, code } => {
                    let _ = child.kill().await;
                    return Err(Error::Tunnel { message, code });
                }
                LogEvent::Other => {}
            }
        }

        let status = child.wait().await?;
        Err(Error::tunnel(format!(
            "ngrok exited before the tunnel came up ({})",
            status
        )))
    }

    async fn kill(&self) -> Result<()> {
        if let Some(mut child) = self.child.lock().await.take() {
            debug!("Killing ngrok (pid {:?})", child.id());
            child.kill().await?;
        }
        Ok(())
    }
}

/// One line of the agent's JSON log
#[derive(Debug, Default, Deserialize)]
struct LogLine {
    #[serde(default)]
    lvl: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    err: Option<String>,
    #[serde(default)]
    error_code: Option<serde_json::Value>,
}

#[derive(Debug, PartialEq, Eq)]
enum LogEvent {
    Started(String),
    Failed {
        message: String,
        code: Option<String>,
    },
    Other,
}

fn parse_log_line(line: &str) -> LogEvent {
    let Ok(entry) = serde_json::from_str::<LogLine>(line) else {
        return LogEvent::Other;
    };

    if let Some(url) = entry.url.filter(|u| u.starts_with("https://") || u.starts_with("http://")) {
        return LogEvent::Started(url);
    }

    let failed_level = matches!(entry.lvl.as_deref(), Some("eror" | "crit"));
    let err = entry.err.filter(|e| !e.is_empty() && e != "<nil>");
    if !failed_level && err.is_none() {
        return LogEvent::Other;
    }

    let message = err
        .or(entry.msg)
        .unwrap_or_else(|| "unknown ngrok error".to_string());
    let code = NGROK_CODE
        .find(&message)
        .map(|m| m.as_str().to_string())
        .or_else(|| match entry.error_code {
            Some(serde_json::Value::String(code)) => Some(code),
            Some(serde_json::Value::Number(code)) => Some(code.to_string()),
            _ => None,
        });

    LogEvent::Failed { message, code }
}
