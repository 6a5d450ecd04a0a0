//! Key-value storage for per-project settings
//!
//! The tunnel connector persists its randomness seed through [`KeyValueStore`]
//! so the public hostname survives across `start` sessions. The app crate
//! provides the file-backed store; [`MemoryStore`] backs tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use expod_core::prelude::*;

/// Settings key holding the tunnel randomness seed
pub const URL_RANDOMNESS_KEY: &str = "urlRandomness";

/// Async string key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory store that counts writes
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with one entry (does not count as a write)
    pub fn with_value(key: &str, value: &str) -> Self {
        let store = Self::default();
        store
            .values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        store
    }

    /// Number of `set` calls so far
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_get_set() {
        let store = MemoryStore::new();
        assert_eq!(store.get(URL_RANDOMNESS_KEY).await.unwrap(), None);

        store.set(URL_RANDOMNESS_KEY, "abc123").await.unwrap();
        assert_eq!(
            store.get(URL_RANDOMNESS_KEY).await.unwrap().as_deref(),
            Some("abc123")
        );
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_with_value_is_not_a_write() {
        let store = MemoryStore::with_value(URL_RANDOMNESS_KEY, "seed");
        assert_eq!(store.writes(), 0);
        assert_eq!(
            store.get(URL_RANDOMNESS_KEY).await.unwrap().as_deref(),
            Some("seed")
        );
    }
}
