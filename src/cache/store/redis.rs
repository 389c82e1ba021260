//! Networked backend on Redis (or any RESP-compatible store).

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use tracing::{debug, info};
use url::Url;

use crate::cache::backend::{BackendError, CacheBackend};

const BACKEND_ID: &str = "redis";

#[derive(Clone)]
pub struct RedisBackend {
    connection: ConnectionManager,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend").finish_non_exhaustive()
    }
}

impl RedisBackend {
    pub async fn connect(url: &str) -> Result<Self, BackendError> {
        let client =
            redis::Client::open(url).map_err(|err| BackendError::new(BACKEND_ID, "connect", err))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|err| BackendError::new(BACKEND_ID, "connect", err))?;

        info!(url = %redact(url), "Connected to redis cache");
        Ok(Self { connection })
    }
}

/// Strip credentials before a URL reaches the logs.
fn redact(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn id(&self) -> &'static str {
        BACKEND_ID
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|err| BackendError::new(BACKEND_ID, "get", err))?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), BackendError> {
        if ttl.is_zero() {
            return Ok(());
        }

        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("PSETEX")
            .arg(key)
            .arg(ttl_ms)
            .arg(value.as_ref())
            .query_async(&mut conn)
            .await
            .map_err(|err| BackendError::new(BACKEND_ID, "set", err))?;

        debug!(cache = BACKEND_ID, key, ttl_ms, "stored entry");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        let mut conn = self.connection.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|err| BackendError::new(BACKEND_ID, "delete", err))?;
        Ok(())
    }
}
