//! Tenantry cache layer.
//!
//! Entity caches are advisory: every entry may be absent at any time and the
//! relational store stays the system of record.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! backend_capacity = 10000
//! default_ttl_seconds = 43200
//! paged_ttl_seconds = 300
//! # ... see config.rs for all options
//! ```

mod backend;
pub mod config;
mod index;
mod keys;
mod lock;
mod manager;

pub(crate) use lock::{rw_read, rw_write};

pub use backend::{CacheBackend, CacheBackendError, MemoryCacheBackend};
pub use config::CacheConfig;
pub use index::KeyIndex;
pub use keys::{KeyComponent, derive_key, matches_sweep, short_hash, sweep_prefix};
pub use manager::{
    CacheManager, KEY_TYPE_GRANT, KEY_TYPE_LIST, KEY_TYPE_PAGED, KEY_TYPE_RECORD,
    KEY_TYPE_RELATION, PagedQuery,
};
pub(crate) use manager::{
    METRIC_CACHE_BACKEND_ERROR, METRIC_CACHE_HIT, METRIC_CACHE_MISS, METRIC_CACHE_SWEEP_KEYS,
};
