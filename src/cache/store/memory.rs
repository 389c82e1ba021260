//! In-process backend.
//!
//! Bounded LRU with per-entry expiry measured on the tokio clock, so paused
//! test time drives expiry exactly like wall time does in production.

use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use tokio::time::Instant;
use tracing::debug;

use crate::cache::backend::{BackendError, CacheBackend};
use crate::util::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store::memory";
const METRIC_CACHE_EVICT_TOTAL: &str = "portico_cache_evict_total";

struct Slot {
    value: Bytes,
    stored: Instant,
    ttl: Duration,
}

impl Slot {
    fn is_expired(&self) -> bool {
        self.stored.elapsed() >= self.ttl
    }
}

pub struct MemoryBackend {
    entries: RwLock<LruCache<String, Slot>>,
}

impl MemoryBackend {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    /// Number of stored entries, expired ones included until they are touched.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn id(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        match entries.get(key) {
            None => return Ok(None),
            Some(slot) if !slot.is_expired() => return Ok(Some(slot.value.clone())),
            Some(_) => {}
        }
        entries.pop(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), BackendError> {
        if ttl.is_zero() {
            return Ok(());
        }

        let slot = Slot {
            value,
            stored: Instant::now(),
            ttl,
        };
        let evicted = rw_write(&self.entries, SOURCE, "set").push(key.to_string(), slot);
        if let Some((evicted_key, _)) = evicted
            && evicted_key != key
        {
            debug!(cache = "memory", key = %evicted_key, "evicted least recently used entry");
            counter!(METRIC_CACHE_EVICT_TOTAL).increment(1);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        rw_write(&self.entries, SOURCE, "delete").pop(key);
        Ok(())
    }
}
