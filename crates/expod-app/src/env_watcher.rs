//! `.env` file loading and watching
//!
//! Values from `.env*` files in the project root are loaded into the process
//! environment. Variables already set when the watcher was created always
//! win. When any `.env*` file changes the files are re-read and an
//! [`EnvEvent::Reloaded`] is sent so the dev server can tell clients to reload.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use expod_core::prelude::*;
use expod_core::Mode;
use notify::RecursiveMode;
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use tokio::sync::mpsc;

/// Default debounce duration in milliseconds
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// What the env watcher reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvEvent {
    /// Files were re-read; `keys` are the variables now set from them
    Reloaded { keys: Vec<String> },
    Error { message: String },
}

/// Env files for `mode`, highest precedence first
pub fn env_files(mode: Mode) -> Vec<String> {
    vec![
        format!(".env.{}.local", mode),
        ".env.local".to_string(),
        format!(".env.{}", mode),
        ".env".to_string(),
    ]
}

fn is_env_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name == ".env" || name.starts_with(".env."))
}

/// Parse `KEY=VALUE` lines. Supports comments, `export` and quoted values.
pub fn parse_env(content: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            continue;
        }
        vars.insert(key.to_string(), parse_value(value.trim()));
    }
    vars
}

fn parse_value(raw: &str) -> String {
    for quote in ['"', '\''] {
        if let Some(inner) = raw.strip_prefix(quote) {
            if let Some(end) = inner.find(quote) {
                let value = &inner[..end];
                return if quote == '"' {
                    value.replace("\\n", "\n")
                } else {
                    value.to_string()
                };
            }
        }
    }
    // Unquoted values end at an inline comment
    match raw.find(" #") {
        Some(idx) => raw[..idx].trim_end().to_string(),
        None => raw.to_string(),
    }
}

/// Merge the env files under `root`; earlier files win
pub fn load_env_files(root: &Path, mode: Mode) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();
    for name in env_files(mode) {
        let path = root.join(&name);
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        debug!("Loaded {}", path.display());
        for (key, value) in parse_env(&content) {
            merged.entry(key).or_insert(value);
        }
    }
    merged
}

/// Tracks which variables came from env files
#[derive(Debug)]
struct EnvState {
    /// Set before we touched the environment; never overwritten
    protected: HashSet<String>,
    /// Set by us on the last load
    loaded: HashSet<String>,
}

impl EnvState {
    fn capture() -> Self {
        Self {
            protected: std::env::vars().map(|(k, _)| k).collect(),
            loaded: HashSet::new(),
        }
    }

    /// Apply `vars`, unset keys that disappeared, and return what is now loaded
    fn apply(&mut self, vars: &BTreeMap<String, String>) -> Vec<String> {
        for stale in self.loaded.iter().filter(|k| !vars.contains_key(*k)) {
            std::env::remove_var(stale);
        }
        self.loaded.clear();

        for (key, value) in vars {
            if self.protected.contains(key) {
                continue;
            }
            std::env::set_var(key, value);
            self.loaded.insert(key.clone());
        }

        let mut keys: Vec<String> = self.loaded.iter().cloned().collect();
        keys.sort();
        keys
    }
}

/// Loads and watches the project's env files
pub struct EnvWatcher {
    project_root: PathBuf,
    mode: Mode,
    debounce: Duration,
    state: Arc<Mutex<EnvState>>,
    stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl EnvWatcher {
    /// Snapshot the current environment so its values stay authoritative
    pub fn new(project_root: PathBuf, mode: Mode) -> Self {
        Self {
            project_root,
            mode,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            state: Arc::new(Mutex::new(EnvState::capture())),
            stop_tx: None,
        }
    }

    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce = Duration::from_millis(ms);
        self
    }

    /// Read the env files into the process environment
    pub fn load(&self) -> Vec<String> {
        let vars = load_env_files(&self.project_root, self.mode);
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .apply(&vars)
    }

    /// Load once, then reload on every change to a `.env*` file
    pub fn start(&mut self, event_tx: mpsc::Sender<EnvEvent>) -> Result<Vec<String>> {
        if self.is_running() {
            return Err(Error::usage("Environment watcher is already running"));
        }
        let keys = self.load();
        if !keys.is_empty() {
            info!("env: loaded {}", keys.join(", "));
        }

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
        self.stop_tx = Some(stop_tx);

        let root = self.project_root.clone();
        let mode = self.mode;
        let debounce = self.debounce;
        let state = self.state.clone();
        tokio::task::spawn_blocking(move || {
            Self::run_watcher(root, mode, debounce, state, event_tx, stop_rx);
        });

        Ok(keys)
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }

    fn run_watcher(
        root: PathBuf,
        mode: Mode,
        debounce: Duration,
        state: Arc<Mutex<EnvState>>,
        event_tx: mpsc::Sender<EnvEvent>,
        mut stop_rx: tokio::sync::oneshot::Receiver<()>,
    ) {
        let tx = event_tx.clone();
        let watched_root = root.clone();
        let debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let touched = events
                        .iter()
                        .any(|event| event.paths.iter().any(|p| is_env_file(p)));
                    if !touched {
                        return;
                    }
                    let vars = load_env_files(&watched_root, mode);
                    let keys = state
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .apply(&vars);
                    info!("env: reloaded environment variables");
                    let _ = tx.blocking_send(EnvEvent::Reloaded { keys });
                }
                Err(errors) => {
                    for error in errors {
                        warn!("Env watcher error: {:?}", error);
                        let _ = tx.blocking_send(EnvEvent::Error {
                            message: error.to_string(),
                        });
                    }
                }
            }
        });

        let mut debouncer = match debouncer {
            Ok(d) => d,
            Err(e) => {
                error!("Failed to create env watcher: {}", e);
                let _ = event_tx.blocking_send(EnvEvent::Error {
                    message: format!("Failed to create watcher: {}", e),
                });
                return;
            }
        };

        if let Err(e) = debouncer.watch(&root, RecursiveMode::NonRecursive) {
            warn!("Failed to watch {}: {}", root.display(), e);
            return;
        }
        debug!("Watching env files in {}", root.display());

        loop {
            match stop_rx.try_recv() {
                Ok(()) | Err(tokio::sync::oneshot::error::TryRecvError::Closed) => {
                    debug!("Env watcher stopping");
                    break;
                }
                Err(tokio::sync::oneshot::error::TryRecvError::Empty) => {
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }
    }
}

impl Drop for EnvWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    fn test_parse_env() {
        let vars = parse_env(
            "# comment\n\
             API_URL=https://example.com\n\
             export TOKEN = 'abc # not a comment'\n\
             GREETING=\"hello\\nworld\"\n\
             PLAIN=value # trailing\n\
             not a pair\n\
             BAD-KEY=1\n",
        );
        assert_eq!(vars["API_URL"], "https://example.com");
        assert_eq!(vars["TOKEN"], "abc # not a comment");
        assert_eq!(vars["GREETING"], "hello\nworld");
        assert_eq!(vars["PLAIN"], "value");
        assert_eq!(vars.len(), 4);
    }

    #[test]
    fn test_env_file_precedence() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join(".env"), "A=base\nB=base\nC=base\n").unwrap();
        std::fs::write(temp.path().join(".env.development"), "B=dev\n").unwrap();
        std::fs::write(temp.path().join(".env.local"), "C=local\n").unwrap();
        std::fs::write(temp.path().join(".env.production"), "A=prod\n").unwrap();

        let vars = load_env_files(temp.path(), Mode::Development);
        assert_eq!(vars["A"], "base");
        assert_eq!(vars["B"], "dev");
        assert_eq!(vars["C"], "local");
    }

    #[test]
    fn test_is_env_file() {
        assert!(is_env_file(Path::new("/p/.env")));
        assert!(is_env_file(Path::new("/p/.env.local")));
        assert!(!is_env_file(Path::new("/p/.envrc")));
        assert!(!is_env_file(Path::new("/p/app.env")));
    }

    #[test]
    #[serial]
    fn test_existing_variables_are_not_overridden() {
        std::env::set_var("EXPOD_TEST_PRESET", "from-shell");
        std::env::remove_var("EXPOD_TEST_FROM_FILE");

        let temp = tempdir().unwrap();
        std::fs::write(
            temp.path().join(".env"),
            "EXPOD_TEST_PRESET=from-file\nEXPOD_TEST_FROM_FILE=yes\n",
        )
        .unwrap();

        let watcher = EnvWatcher::new(temp.path().to_path_buf(), Mode::Development);
        let keys = watcher.load();

        assert_eq!(keys, vec!["EXPOD_TEST_FROM_FILE"]);
        assert_eq!(std::env::var("EXPOD_TEST_PRESET").unwrap(), "from-shell");
        assert_eq!(std::env::var("EXPOD_TEST_FROM_FILE").unwrap(), "yes");

        // Removing the key from the file unsets it on reload
        std::fs::write(temp.path().join(".env"), "EXPOD_TEST_PRESET=from-file\n").unwrap();
        assert!(watcher.load().is_empty());
        assert!(std::env::var("EXPOD_TEST_FROM_FILE").is_err());

        std::env::remove_var("EXPOD_TEST_PRESET");
    }

    #[tokio::test]
    #[serial]
    async fn test_double_start_is_error() {
        let temp = tempdir().unwrap();
        let mut watcher = EnvWatcher::new(temp.path().to_path_buf(), Mode::Development);
        let (tx, _rx) = mpsc::channel(8);

        watcher.start(tx.clone()).unwrap();
        assert!(watcher.is_running());
        assert!(watcher.start(tx).unwrap_err().is_usage());

        watcher.stop();
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    #[serial]
    async fn test_change_triggers_reload_event() {
        std::env::remove_var("EXPOD_TEST_WATCHED");
        let temp = tempdir().unwrap();
        let mut watcher =
            EnvWatcher::new(temp.path().to_path_buf(), Mode::Development).with_debounce_ms(50);
        let (tx, mut rx) = mpsc::channel(8);
        watcher.start(tx).unwrap();

        // Give the watcher time to register
        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(temp.path().join(".env"), "EXPOD_TEST_WATCHED=1\n").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            EnvEvent::Reloaded {
                keys: vec!["EXPOD_TEST_WATCHED".to_string()]
            }
        );

        watcher.stop();
        std::env::remove_var("EXPOD_TEST_WATCHED");
    }
}
