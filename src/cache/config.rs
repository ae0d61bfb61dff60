//! Cache configuration.
//!
//! Controls the shared cache backend and the lifetimes of derived entries via
//! the `[cache]` section of `tenantry.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_BACKEND_CAPACITY: usize = 10_000;
pub const DEFAULT_TTL_SECONDS: u64 = 12 * 60 * 60;
pub const DEFAULT_PAGED_TTL_SECONDS: u64 = 5 * 60;
pub const DEFAULT_GRANT_TTL_SECONDS: u64 = 60;
pub const DEFAULT_RELATION_TTL_SECONDS: u64 = 60;
/// Longest key accepted by common key-value backends once namespaced.
pub const DEFAULT_MAX_KEY_LENGTH: usize = 172;
/// Truncated keys keep at least this many bytes of their readable head.
pub const MIN_MAX_KEY_LENGTH: usize = 32;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false every lookup is a miss and every write is skipped.
    pub enabled: bool,
    /// Maximum entries held by the in-memory backend.
    pub backend_capacity: usize,
    /// Entity default TTL, used when a profile does not override it.
    pub default_ttl_seconds: u64,
    /// TTL of paginated list results.
    pub paged_ttl_seconds: u64,
    /// TTL of externally granted authorization decisions.
    pub grant_ttl_seconds: u64,
    /// TTL of module-local relation lookups.
    pub relation_ttl_seconds: u64,
    pub max_key_length: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend_capacity: DEFAULT_BACKEND_CAPACITY,
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            paged_ttl_seconds: DEFAULT_PAGED_TTL_SECONDS,
            grant_ttl_seconds: DEFAULT_GRANT_TTL_SECONDS,
            relation_ttl_seconds: DEFAULT_RELATION_TTL_SECONDS,
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            backend_capacity: settings.backend_capacity.get(),
            default_ttl_seconds: settings.default_ttl.as_secs(),
            paged_ttl_seconds: settings.paged_ttl.as_secs(),
            grant_ttl_seconds: settings.grant_ttl.as_secs(),
            relation_ttl_seconds: settings.relation_ttl.as_secs(),
            max_key_length: settings.max_key_length,
        }
    }
}

impl CacheConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the backend capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn backend_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.backend_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    pub fn paged_ttl(&self) -> Duration {
        Duration::from_secs(self.paged_ttl_seconds)
    }

    pub fn grant_ttl(&self) -> Duration {
        Duration::from_secs(self.grant_ttl_seconds)
    }

    pub fn relation_ttl(&self) -> Duration {
        Duration::from_secs(self.relation_ttl_seconds)
    }

    /// Key bound, raised to the minimum that leaves room for the hash suffix.
    pub fn key_bound(&self) -> usize {
        self.max_key_length.max(MIN_MAX_KEY_LENGTH)
    }
}
