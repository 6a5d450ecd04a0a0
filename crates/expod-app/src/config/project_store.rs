//! Per-project session settings in `.expo/settings.json`
//!
//! Holds values that survive across `start` sessions, notably the tunnel
//! `urlRandomness`. Writes take an advisory exclusive lock and replace the
//! file atomically; concurrent CLI processes resolve as last writer wins.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use expod_core::prelude::*;
use expod_daemon::KeyValueStore;
use fs2::FileExt;
use serde_json::{Map, Value};

const EXPO_DIR: &str = ".expo";
const SETTINGS_FILENAME: &str = "settings.json";
const LOCK_FILENAME: &str = ".settings.json.lock";

/// JSON-object file store
#[derive(Debug, Clone)]
pub struct ProjectSettingsStore {
    dir: PathBuf,
}

impl ProjectSettingsStore {
    pub fn new(project_root: &Path) -> Self {
        Self {
            dir: project_root.join(EXPO_DIR),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(SETTINGS_FILENAME)
    }

    fn read_object(path: &Path) -> Result<Map<String, Value>> {
        if !path.exists() {
            return Ok(Map::new());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => {
                warn!("Ignoring malformed {:?}", path);
                Ok(Map::new())
            }
        }
    }

    fn write_value(dir: &Path, key: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::config(format!("Failed to create .expo dir: {}", e)))?;

        let lock = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILENAME))
            .map_err(|e| Error::config(format!("Failed to open settings lock: {}", e)))?;
        lock.lock_exclusive()
            .map_err(|e| Error::config(format!("Failed to lock settings.json: {}", e)))?;

        let path = dir.join(SETTINGS_FILENAME);
        let mut object = Self::read_object(&path)?;
        object.insert(key.to_string(), Value::String(value.to_string()));
        let content = serde_json::to_string_pretty(&Value::Object(object))?;

        // Atomic write: write to temp, then rename
        let temp_path = dir.join(".settings.json.tmp");
        std::fs::write(&temp_path, content)
            .map_err(|e| Error::config(format!("Failed to write temp file: {}", e)))?;
        std::fs::rename(&temp_path, &path)
            .map_err(|e| Error::config(format!("Failed to rename temp file: {}", e)))?;

        debug!("Saved {} to {:?}", key, path);
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for ProjectSettingsStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let object = Self::read_object(&path)?;
            Ok(object.get(&key).and_then(Value::as_str).map(str::to_string))
        })
        .await
        .map_err(|e| Error::config(format!("Settings read task failed: {}", e)))?
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let dir = self.dir.clone();
        let key = key.to_string();
        let value = value.to_string();
        tokio::task::spawn_blocking(move || Self::write_value(&dir, &key, &value))
            .await
            .map_err(|e| Error::config(format!("Settings write task failed: {}", e)))?
    }
}
