//! Cache backends.
//!
//! The manager only needs namespaced get/set/delete with a TTL. Backends that
//! can enumerate their keys advertise it; the manager keeps its own key index
//! for the ones that cannot.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use serde_json::Value;
use thiserror::Error;

use super::config::CacheConfig;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::backend";

#[derive(Debug, Error)]
pub enum CacheBackendError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cache backend does not support `{0}`")]
    Unsupported(&'static str),
}

impl CacheBackendError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, CacheBackendError>;

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), CacheBackendError>;

    /// Returns whether an entry was removed.
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, CacheBackendError>;

    fn supports_key_listing(&self) -> bool {
        false
    }

    /// Live keys of `namespace`; only meaningful when `supports_key_listing`.
    async fn keys(&self, _namespace: &str) -> Result<Vec<String>, CacheBackendError> {
        Err(CacheBackendError::Unsupported("keys"))
    }

    async fn clear_namespace(&self, _namespace: &str) -> Result<(), CacheBackendError> {
        Err(CacheBackendError::Unsupported("clear_namespace"))
    }
}

#[derive(Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

/// In-process backend: a bounded LRU with per-entry expiry.
pub struct MemoryCacheBackend {
    entries: RwLock<LruCache<(String, String), Entry>>,
    key_listing: bool,
}

impl MemoryCacheBackend {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.backend_capacity_non_zero())),
            key_listing: true,
        }
    }

    /// Same storage, but behaves like a distributed cache without key listing.
    pub fn without_key_listing(config: &CacheConfig) -> Self {
        Self {
            key_listing: false,
            ..Self::new(config)
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, CacheBackendError> {
        let lookup = (namespace.to_string(), key.to_string());
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        let Some(entry) = entries.get(&lookup) else {
            return Ok(None);
        };
        if entry.is_live(Instant::now()) {
            return Ok(Some(entry.value.clone()));
        }
        entries.pop(&lookup);
        Ok(None)
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), CacheBackendError> {
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        rw_write(&self.entries, SOURCE, "set").put(
            (namespace.to_string(), key.to_string()),
            Entry { value, expires_at },
        );
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, CacheBackendError> {
        let removed = rw_write(&self.entries, SOURCE, "delete")
            .pop(&(namespace.to_string(), key.to_string()))
            .is_some();
        Ok(removed)
    }

    fn supports_key_listing(&self) -> bool {
        self.key_listing
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>, CacheBackendError> {
        if !self.key_listing {
            return Err(CacheBackendError::Unsupported("keys"));
        }
        let now = Instant::now();
        let keys = rw_read(&self.entries, SOURCE, "keys")
            .iter()
            .filter(|((ns, _), entry)| ns == namespace && entry.is_live(now))
            .map(|((_, key), _)| key.clone())
            .collect();
        Ok(keys)
    }

    async fn clear_namespace(&self, namespace: &str) -> Result<(), CacheBackendError> {
        let mut entries = rw_write(&self.entries, SOURCE, "clear_namespace");
        let doomed: Vec<(String, String)> = entries
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            entries.pop(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn backend(capacity: usize) -> MemoryCacheBackend {
        MemoryCacheBackend::new(&CacheConfig {
            backend_capacity: capacity,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn set_then_get_round_trips_within_namespace() {
        let backend = backend(8);
        backend
            .set("a", "k", json!({"v": 1}), Duration::from_secs(60))
            .await
            .expect("set");

        assert_eq!(backend.get("a", "k").await.expect("get"), Some(json!({"v": 1})));
        assert_eq!(backend.get("b", "k").await.expect("get"), None);
    }

    #[tokio::test]
    async fn expired_entries_are_dropped_on_read() {
        let backend = backend(8);
        backend
            .set("a", "k", json!(1), Duration::from_millis(5))
            .await
            .expect("set");
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(backend.get("a", "k").await.expect("get"), None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let backend = backend(2);
        for key in ["one", "two", "three"] {
            backend
                .set("a", key, json!(key), Duration::from_secs(60))
                .await
                .expect("set");
        }
        assert_eq!(backend.len(), 2);
        assert_eq!(backend.get("a", "one").await.expect("get"), None);
    }

    #[tokio::test]
    async fn clear_namespace_leaves_other_namespaces() {
        let backend = backend(8);
        backend.set("a", "k", json!(1), Duration::ZERO).await.expect("set");
        backend.set("b", "k", json!(2), Duration::ZERO).await.expect("set");

        backend.clear_namespace("a").await.expect("clear");

        assert!(backend.keys("a").await.expect("keys").is_empty());
        assert_eq!(backend.keys("b").await.expect("keys"), vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn listing_can_be_disabled() {
        let backend = MemoryCacheBackend::without_key_listing(&CacheConfig::default());
        assert!(!backend.supports_key_listing());
        assert!(matches!(
            backend.keys("a").await,
            Err(CacheBackendError::Unsupported("keys"))
        ));
    }
}
