//! Persistent key/value store interface.
//!
//! The core only needs eventual consistency: `get`/`set` plus a change
//! listener. The host supplies the real store; [`MemoryStore`] backs tests
//! and standalone use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub type ChangeListener = Box<dyn Fn(&serde_json::Value) + Send + Sync>;

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<serde_json::Value>;
    fn set(&self, key: &str, value: serde_json::Value);
    fn on_change(&self, key: &str, listener: ChangeListener);
}

/// In-memory store with change notification.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, serde_json::Value>>,
    listeners: Mutex<HashMap<String, Vec<ChangeListener>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Number of registered change listeners for a key.
    pub fn listeners_for(&self, key: &str) -> usize {
        self.listeners
            .lock()
            .unwrap()
            .get(key)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.data.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: serde_json::Value) {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.clone());
        if let Some(listeners) = self.listeners.lock().unwrap().get(key) {
            for listener in listeners {
                listener(&value);
            }
        }
    }

    fn on_change(&self, key: &str, listener: ChangeListener) {
        self.listeners
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push(listener);
    }
}

/// A typed storage cell: one key, a default, and a cached last-known value
/// kept current through the store's change notifications.
pub struct StorageValue<T> {
    store: Arc<dyn KvStore>,
    key: String,
    default: T,
    cached: Arc<Mutex<Option<T>>>,
}

impl<T> StorageValue<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn KvStore>, key: &str, default: T) -> Self {
        let cached: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
        let observed = cached.clone();
        store.on_change(
            key,
            Box::new(move |raw| {
                // A malformed external write clears the cache; the next read
                // falls back through the store to the default.
                *observed.lock().unwrap() = serde_json::from_value(raw.clone()).ok();
            }),
        );
        StorageValue {
            store,
            key: key.to_string(),
            default,
            cached,
        }
    }

    /// Current value: cache, then store, then the default. A stored value
    /// that fails to deserialize falls back to the default.
    pub fn get(&self) -> T {
        if let Some(v) = self.cached.lock().unwrap().clone() {
            return v;
        }
        let value = match self.store.get(&self.key) {
            Some(raw) => serde_json::from_value(raw).unwrap_or_else(|e| {
                warn!("stored value for {:?} is malformed: {}", self.key, e);
                self.default.clone()
            }),
            None => self.default.clone(),
        };
        *self.cached.lock().unwrap() = Some(value.clone());
        value
    }

    pub fn set(&self, value: T) {
        *self.cached.lock().unwrap() = Some(value.clone());
        match serde_json::to_value(&value) {
            Ok(raw) => self.store.set(&self.key, raw),
            Err(e) => warn!("could not serialize value for {:?}: {}", self.key, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn storage_value_falls_back_to_default() {
        let store = Arc::new(MemoryStore::new());
        let cell = StorageValue::new(store.clone(), "downloadOption", "image/png".to_string());
        assert_eq!(cell.get(), "image/png");

        cell.set("image/webp".to_string());
        assert_eq!(cell.get(), "image/webp");
        assert_eq!(
            store.get("downloadOption"),
            Some(serde_json::json!("image/webp"))
        );
    }

    #[test]
    fn malformed_stored_value_yields_default() {
        let store = Arc::new(MemoryStore::new());
        store.set("autoDownloadOption", serde_json::json!("not-a-bool"));
        let cell = StorageValue::new(store, "autoDownloadOption", true);
        assert!(cell.get());
    }

    #[test]
    fn external_writes_reach_the_cached_cell() {
        let store = Arc::new(MemoryStore::new());
        let cell = StorageValue::new(store.clone(), "downloadOption", "image/png".to_string());
        assert_eq!(cell.get(), "image/png");

        // Written behind the cell's back, e.g. from the options page.
        store.set("downloadOption", serde_json::json!("image/jpeg"));
        assert_eq!(cell.get(), "image/jpeg");
    }

    #[test]
    fn change_listeners_fire_on_set() {
        let store = MemoryStore::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let observed = hits.clone();
        store.on_change(
            "k",
            Box::new(move |v| {
                assert_eq!(v, &serde_json::json!(42));
                observed.fetch_add(1, Ordering::SeqCst);
            }),
        );
        store.set("k", serde_json::json!(42));
        store.set("other", serde_json::json!(1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
