//! Namespaced cache operations for one entity profile.
//!
//! Every operation degrades to "nothing cached": backend failures are logged,
//! counted and reported as a miss (reads) or `false` (writes), never raised.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::descriptor::CacheProfile;
use crate::domain::types::{AccessScope, SortDirection};

use super::backend::{CacheBackend, CacheBackendError};
use super::config::CacheConfig;
use super::index::KeyIndex;
use super::keys::{KeyComponent, derive_key, matches_sweep, short_hash, sweep_prefix};

pub const KEY_TYPE_RECORD: &str = "record";
pub const KEY_TYPE_LIST: &str = "list";
pub const KEY_TYPE_PAGED: &str = "paged";
pub const KEY_TYPE_RELATION: &str = "relation";
pub const KEY_TYPE_GRANT: &str = "grant";

pub(crate) const METRIC_CACHE_HIT: &str = "tenantry_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "tenantry_cache_miss_total";
pub(crate) const METRIC_CACHE_BACKEND_ERROR: &str = "tenantry_cache_backend_error_total";
pub(crate) const METRIC_CACHE_SWEEP_KEYS: &str = "tenantry_cache_sweep_keys_total";

/// Shape of one paginated list request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PagedQuery {
    pub access_scope: AccessScope,
    pub offset: u64,
    pub limit: u64,
    pub search: Option<String>,
    pub sort_column: Option<String>,
    pub sort_direction: SortDirection,
    /// Additional filters, keyed by a hash of each serialized value.
    pub extra: BTreeMap<String, Value>,
}

impl PagedQuery {
    fn components(&self, context: &str) -> Vec<KeyComponent> {
        let mut components = vec![
            KeyComponent::from(context),
            self.access_scope.into(),
            self.offset.into(),
            self.limit.into(),
            short_hash(self.search.as_deref().unwrap_or_default()).into(),
            self.sort_column.clone().unwrap_or_default().into(),
            self.sort_direction.into(),
        ];
        for (name, value) in &self.extra {
            components.push(short_hash(&format!("{name}={value}")).into());
        }
        components
    }
}

pub struct CacheManager {
    profile: CacheProfile,
    config: CacheConfig,
    backend: Arc<dyn CacheBackend>,
    index: Option<KeyIndex>,
}

impl CacheManager {
    pub fn new(profile: CacheProfile, config: CacheConfig, backend: Arc<dyn CacheBackend>) -> Self {
        let index = (!backend.supports_key_listing()).then(KeyIndex::new);
        Self {
            profile,
            config,
            backend,
            index,
        }
    }

    pub fn profile(&self) -> &CacheProfile {
        &self.profile
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    /// Derives the bounded key for `key_type` and `components`.
    pub fn key(&self, key_type: &str, components: &[KeyComponent]) -> String {
        derive_key(
            self.profile.prefix(key_type),
            components,
            self.config.key_bound(),
        )
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        key_type: &str,
        components: &[KeyComponent],
    ) -> Option<T> {
        let key = self.key(key_type, components);
        self.get_key(&key).await
    }

    /// Stores `value`; `ttl` of `None` uses the profile default, or the
    /// configured default when the profile leaves it at zero.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key_type: &str,
        value: &T,
        ttl: Option<Duration>,
        components: &[KeyComponent],
    ) -> bool {
        let key = self.key(key_type, components);
        let ttl = ttl.unwrap_or_else(|| self.default_ttl());
        self.set_key(&key, value, ttl).await
    }

    pub fn default_ttl(&self) -> Duration {
        if self.profile.default_ttl.is_zero() {
            self.config.default_ttl()
        } else {
            self.profile.default_ttl
        }
    }

    pub async fn delete(&self, key_type: &str, components: &[KeyComponent]) -> bool {
        let key = self.key(key_type, components);
        self.delete_key(&key).await
    }

    pub async fn exists(&self, key_type: &str, components: &[KeyComponent]) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let key = self.key(key_type, components);
        match self.backend.get(self.profile.namespace, &key).await {
            Ok(value) => value.is_some(),
            Err(err) => {
                self.backend_failure("exists", &key, &err);
                false
            }
        }
    }

    pub async fn get_paged_result<T: DeserializeOwned>(
        &self,
        context: &str,
        query: &PagedQuery,
    ) -> Option<T> {
        self.get(KEY_TYPE_PAGED, &query.components(context)).await
    }

    pub async fn set_paged_result<T: Serialize + ?Sized>(
        &self,
        context: &str,
        query: &PagedQuery,
        value: &T,
    ) -> bool {
        self.set(
            KEY_TYPE_PAGED,
            value,
            Some(self.config.paged_ttl()),
            &query.components(context),
        )
        .await
    }

    /// Deletes the one page matching `filters`, or every page of `context`.
    pub async fn invalidate_paged_result(&self, context: &str, filters: Option<&PagedQuery>) -> bool {
        match filters {
            Some(query) => self.delete(KEY_TYPE_PAGED, &query.components(context)).await,
            None => {
                self.invalidate_prefix(KEY_TYPE_PAGED, &[KeyComponent::from(context)])
                    .await
            }
        }
    }

    /// Sweeps every key of `key_type` whose leading components equal `leading`.
    pub async fn invalidate_prefix(&self, key_type: &str, leading: &[KeyComponent]) -> bool {
        let sweep = sweep_prefix(self.profile.prefix(key_type), leading);
        self.sweep(&sweep).await
    }

    /// Clears one key type, or the whole namespace when `key_type` is `None`.
    pub async fn clear(&self, key_type: Option<&str>) -> bool {
        if let Some(key_type) = key_type {
            return self.invalidate_prefix(key_type, &[]).await;
        }
        if !self.is_enabled() {
            return true;
        }

        let namespace = self.profile.namespace;
        match self.backend.clear_namespace(namespace).await {
            Ok(()) => {
                if let Some(index) = &self.index {
                    index.clear(namespace);
                }
                true
            }
            Err(CacheBackendError::Unsupported(_)) => {
                let mut cleared = true;
                for prefix in self.profile.known_prefixes {
                    cleared &= self.sweep(&sweep_prefix(prefix, &[])).await;
                }
                cleared
            }
            Err(err) => {
                self.backend_failure("clear", namespace, &err);
                false
            }
        }
    }

    async fn get_key<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.is_enabled() {
            return None;
        }
        let namespace = self.profile.namespace;
        match self.backend.get(namespace, key).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(decoded) => {
                    counter!(METRIC_CACHE_HIT, "namespace" => namespace).increment(1);
                    Some(decoded)
                }
                Err(err) => {
                    warn!(
                        namespace,
                        entity = self.profile.label,
                        key,
                        error = %err,
                        result = "degraded_to_miss",
                        "Cached value could not be decoded"
                    );
                    counter!(METRIC_CACHE_MISS, "namespace" => namespace).increment(1);
                    None
                }
            },
            Ok(None) => {
                counter!(METRIC_CACHE_MISS, "namespace" => namespace).increment(1);
                None
            }
            Err(err) => {
                self.backend_failure("get", key, &err);
                None
            }
        }
    }

    async fn set_key<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let namespace = self.profile.namespace;
        let encoded = match serde_json::to_value(value) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(
                    namespace,
                    entity = self.profile.label,
                    key,
                    error = %err,
                    "Value could not be encoded for caching"
                );
                return false;
            }
        };

        match self.backend.set(namespace, key, encoded, ttl).await {
            Ok(()) => {
                if let Some(index) = &self.index {
                    index.record(namespace, key);
                }
                true
            }
            Err(err) => {
                self.backend_failure("set", key, &err);
                false
            }
        }
    }

    async fn delete_key(&self, key: &str) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let namespace = self.profile.namespace;
        match self.backend.delete(namespace, key).await {
            Ok(_) => {
                if let Some(index) = &self.index {
                    index.forget(namespace, key);
                }
                true
            }
            Err(err) => {
                self.backend_failure("delete", key, &err);
                false
            }
        }
    }

    async fn sweep(&self, sweep: &str) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let namespace = self.profile.namespace;
        let keys = if self.backend.supports_key_listing() {
            match self.backend.keys(namespace).await {
                Ok(keys) => keys,
                Err(err) => {
                    self.backend_failure("sweep.keys", sweep, &err);
                    return false;
                }
            }
        } else {
            self.index
                .as_ref()
                .map(|index| index.keys(namespace))
                .unwrap_or_default()
        };

        let mut removed = 0u64;
        let mut complete = true;
        for key in keys.iter().filter(|key| matches_sweep(key, sweep)) {
            if self.delete_key(key).await {
                removed += 1;
            } else {
                complete = false;
            }
        }

        counter!(METRIC_CACHE_SWEEP_KEYS, "namespace" => namespace).increment(removed);
        debug!(namespace, sweep, removed, complete, "Swept cache prefix");
        complete
    }

    fn backend_failure(&self, op: &'static str, key: &str, err: &CacheBackendError) {
        let namespace = self.profile.namespace;
        counter!(METRIC_CACHE_BACKEND_ERROR, "namespace" => namespace, "op" => op).increment(1);
        warn!(
            op,
            namespace,
            entity = self.profile.label,
            key,
            error = %err,
            result = "degraded_to_miss",
            "Cache backend failure ignored"
        );
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::backend::MemoryCacheBackend;
    use super::*;

    const PROFILE: CacheProfile = CacheProfile {
        namespace: "widgets",
        label: "Widget",
        default_ttl: Duration::from_secs(60),
        key_types: &[
            (KEY_TYPE_RECORD, "widget"),
            (KEY_TYPE_LIST, "widget_list"),
            (KEY_TYPE_PAGED, "widget_paged"),
        ],
        known_prefixes: &["widget", "widget_list", "widget_paged"],
    };

    fn manager(listing: bool) -> CacheManager {
        let config = CacheConfig::default();
        let backend: Arc<dyn CacheBackend> = if listing {
            Arc::new(MemoryCacheBackend::new(&config))
        } else {
            Arc::new(MemoryCacheBackend::without_key_listing(&config))
        };
        CacheManager::new(PROFILE, config, backend)
    }

    #[tokio::test]
    async fn set_then_get_returns_value() {
        let cache = manager(true);
        assert!(cache.set(KEY_TYPE_RECORD, &json!({"name": "Acme"}), None, &[1i64.into()]).await);

        let cached: Option<Value> = cache.get(KEY_TYPE_RECORD, &[1i64.into()]).await;
        assert_eq!(cached, Some(json!({"name": "Acme"})));
        assert!(cache.exists(KEY_TYPE_RECORD, &[1i64.into()]).await);
        assert!(!cache.exists(KEY_TYPE_RECORD, &[2i64.into()]).await);
    }

    #[tokio::test]
    async fn delete_removes_value() {
        let cache = manager(true);
        cache.set(KEY_TYPE_LIST, &1, None, &["ctx".into()]).await;
        assert!(cache.delete(KEY_TYPE_LIST, &["ctx".into()]).await);
        assert_eq!(cache.get::<i32>(KEY_TYPE_LIST, &["ctx".into()]).await, None);
    }

    #[tokio::test]
    async fn decode_mismatch_is_a_miss() {
        let cache = manager(true);
        cache.set(KEY_TYPE_LIST, "text", None, &["ctx".into()]).await;
        assert_eq!(cache.get::<i64>(KEY_TYPE_LIST, &["ctx".into()]).await, None);
    }

    #[tokio::test]
    async fn paged_results_distinguish_query_shapes() {
        let cache = manager(true);
        let first = PagedQuery {
            limit: 20,
            search: Some("acme".to_string()),
            ..Default::default()
        };
        let second = PagedQuery {
            search: Some("globex".to_string()),
            ..first.clone()
        };
        let mut third = first.clone();
        third.extra.insert("status".to_string(), json!("active"));

        assert!(cache.set_paged_result("orgs", &first, &vec![1]).await);
        assert!(cache.set_paged_result("orgs", &second, &vec![2]).await);
        assert!(cache.set_paged_result("orgs", &third, &vec![3]).await);

        assert_eq!(cache.get_paged_result::<Vec<i32>>("orgs", &first).await, Some(vec![1]));
        assert_eq!(cache.get_paged_result::<Vec<i32>>("orgs", &second).await, Some(vec![2]));
        assert_eq!(cache.get_paged_result::<Vec<i32>>("orgs", &third).await, Some(vec![3]));
    }

    async fn assert_prefix_sweep(cache: CacheManager) {
        let query = PagedQuery {
            limit: 10,
            ..Default::default()
        };
        let other_page = PagedQuery {
            offset: 10,
            ..query.clone()
        };
        cache.set_paged_result("orgs", &query, &1).await;
        cache.set_paged_result("orgs", &other_page, &2).await;
        cache.set_paged_result("orgs2", &query, &3).await;
        cache.set(KEY_TYPE_RECORD, &4, None, &["orgs".into()]).await;

        assert!(cache.invalidate_paged_result("orgs", None).await);

        assert_eq!(cache.get_paged_result::<i32>("orgs", &query).await, None);
        assert_eq!(cache.get_paged_result::<i32>("orgs", &other_page).await, None);
        assert_eq!(cache.get_paged_result::<i32>("orgs2", &query).await, Some(3));
        assert_eq!(cache.get::<i32>(KEY_TYPE_RECORD, &["orgs".into()]).await, Some(4));
    }

    #[tokio::test]
    async fn prefix_sweep_with_key_listing() {
        assert_prefix_sweep(manager(true)).await;
    }

    #[tokio::test]
    async fn prefix_sweep_through_key_index() {
        assert_prefix_sweep(manager(false)).await;
    }

    #[tokio::test]
    async fn exact_invalidation_keeps_other_pages() {
        let cache = manager(true);
        let query = PagedQuery::default();
        let other = PagedQuery {
            offset: 5,
            ..Default::default()
        };
        cache.set_paged_result("orgs", &query, &1).await;
        cache.set_paged_result("orgs", &other, &2).await;

        assert!(cache.invalidate_paged_result("orgs", Some(&query)).await);

        assert_eq!(cache.get_paged_result::<i32>("orgs", &query).await, None);
        assert_eq!(cache.get_paged_result::<i32>("orgs", &other).await, Some(2));
    }

    #[tokio::test]
    async fn clear_key_type_and_namespace() {
        for listing in [true, false] {
            let cache = manager(listing);
            cache.set(KEY_TYPE_RECORD, &1, None, &[1i64.into()]).await;
            cache.set(KEY_TYPE_LIST, &2, None, &["ctx".into()]).await;

            assert!(cache.clear(Some(KEY_TYPE_LIST)).await);
            assert_eq!(cache.get::<i32>(KEY_TYPE_LIST, &["ctx".into()]).await, None);
            assert_eq!(cache.get::<i32>(KEY_TYPE_RECORD, &[1i64.into()]).await, Some(1));

            assert!(cache.clear(None).await);
            assert_eq!(cache.get::<i32>(KEY_TYPE_RECORD, &[1i64.into()]).await, None);
        }
    }

    #[tokio::test]
    async fn disabled_manager_is_a_permanent_miss() {
        let config = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        let cache = CacheManager::new(PROFILE, config.clone(), Arc::new(MemoryCacheBackend::new(&config)));
        assert!(!cache.set(KEY_TYPE_RECORD, &1, None, &[1i64.into()]).await);
        assert_eq!(cache.get::<i32>(KEY_TYPE_RECORD, &[1i64.into()]).await, None);
        assert!(cache.delete(KEY_TYPE_RECORD, &[1i64.into()]).await);
    }

    #[test]
    fn zero_profile_ttl_inherits_configured_default() {
        let config = CacheConfig::default();
        let profile = CacheProfile {
            default_ttl: Duration::ZERO,
            ..PROFILE
        };
        let cache = CacheManager::new(profile, config.clone(), Arc::new(MemoryCacheBackend::new(&config)));
        assert_eq!(cache.default_ttl(), config.default_ttl());
        assert_eq!(manager(true).default_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn keys_use_profile_prefixes() {
        let cache = manager(true);
        assert_eq!(cache.key(KEY_TYPE_RECORD, &[7i64.into()]), "widget:7");
        assert_eq!(cache.key("custom", &["x".into()]), "custom:x");
    }
}
