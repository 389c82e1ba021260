//! Storage backend contract.
//!
//! A backend stores opaque byte values under string keys with a TTL. Failures
//! are always reported as [`BackendError`]; a backend never turns an I/O
//! problem into a silent miss.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::info;

use super::config::{BackendKind, CacheConfig};
use super::store::{DiskBackend, MemoryBackend, RedisBackend};

#[derive(Debug, Clone, Error)]
#[error("{backend} cache backend failed to {op}: {message}")]
pub struct BackendError {
    pub backend: &'static str,
    pub op: &'static str,
    pub message: String,
}

impl BackendError {
    pub fn new(backend: &'static str, op: &'static str, message: impl Display) -> Self {
        Self {
            backend,
            op,
            message: message.to_string(),
        }
    }
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short identifier recorded on every entry read from this backend.
    fn id(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError>;

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), BackendError>;

    async fn delete(&self, key: &str) -> Result<(), BackendError>;

    /// Persist anything still buffered. Called once on shutdown.
    async fn flush(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Open the backend selected by configuration.
pub async fn open_backend(config: &CacheConfig) -> Result<Arc<dyn CacheBackend>, BackendError> {
    let backend: Arc<dyn CacheBackend> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryBackend::new(config.memory_capacity_non_zero())),
        BackendKind::Disk => Arc::new(DiskBackend::open(&config.disk_path).await?),
        BackendKind::Redis => {
            let url = config.redis_url.as_deref().ok_or_else(|| {
                BackendError::new("redis", "connect", "cache.redis_url is not configured")
            })?;
            Arc::new(RedisBackend::connect(url).await?)
        }
    };

    info!(backend = backend.id(), "Cache backend ready");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_memory_backend_by_default() {
        let backend = open_backend(&CacheConfig::default())
            .await
            .expect("memory backend opens");
        assert_eq!(backend.id(), "memory");
    }

    #[tokio::test]
    async fn redis_without_url_is_a_backend_error() {
        let config = CacheConfig {
            backend: BackendKind::Redis,
            redis_url: None,
            ..Default::default()
        };
        let err = match open_backend(&config).await {
            Ok(_) => panic!("redis without url must fail"),
            Err(err) => err,
        };
        assert_eq!(err.backend, "redis");
        assert_eq!(err.op, "connect");
    }
}
