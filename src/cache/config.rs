//! Cache configuration.
//!
//! Selects the storage backend and the global TTL defaults. Per-provider and
//! per-endpoint TTLs live in the provider settings and are folded into a
//! [`TtlPolicy`](super::TtlPolicy) at startup.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_KEY_PREFIX: &str = "portico";
const DEFAULT_MEMORY_CAPACITY: usize = 10_000;
const DEFAULT_DISK_PATH: &str = "cache";
const DEFAULT_TTL_SECS: u64 = 3600;

/// Storage backend behind the cache manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Disk,
    Redis,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Disk => "disk",
            BackendKind::Redis => "redis",
        }
    }
}

/// Cache configuration from `portico.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Which backend stores entries.
    pub backend: BackendKind,
    /// Namespace prepended to every derived key.
    pub key_prefix: String,
    /// Maximum entries held by the memory backend.
    pub memory_capacity: usize,
    /// Root directory of the disk backend.
    pub disk_path: PathBuf,
    /// Connection URL of the redis backend.
    pub redis_url: Option<String>,
    /// TTL applied when neither provider nor endpoint overrides it.
    pub default_ttl_seconds: u64,
    /// TTL of negative (not-found) entries; zero disables negative caching.
    pub negative_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            disk_path: PathBuf::from(DEFAULT_DISK_PATH),
            redis_url: None,
            default_ttl_seconds: DEFAULT_TTL_SECS,
            negative_ttl_seconds: 0,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            backend: settings.backend,
            key_prefix: settings.key_prefix.clone(),
            memory_capacity: settings.memory_capacity.get(),
            disk_path: settings.disk_path.clone(),
            redis_url: settings.redis_url.clone(),
            default_ttl_seconds: settings.default_ttl.as_secs(),
            negative_ttl_seconds: settings.negative_ttl.as_secs(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    pub fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_ttl_seconds)
    }

    /// Returns the memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}
