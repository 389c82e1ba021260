//! On-disk backend.
//!
//! One file per key, fanned out over two directory levels by the SHA-256 of
//! the key. Each file starts with the wall-clock expiry (unix milliseconds,
//! big endian) followed by the stored value. Writes go through a temp file
//! and a rename so readers never observe a partial entry.
//!
//! Expired entries are removed when read, and by a sweep of the whole tree
//! on open and on flush. The sweep also collects temp files orphaned by a
//! crash mid-write.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::backend::{BackendError, CacheBackend};

const BACKEND_ID: &str = "disk";
const HEADER_LEN: usize = 8;
const TMP_MARKER: &str = ".tmp-";
/// Temp files younger than this may belong to a write still in progress.
const ORPHAN_TMP_AGE: Duration = Duration::from_secs(60);

/// Files removed by one [`DiskBackend::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub expired: usize,
    pub orphaned: usize,
}

pub struct DiskBackend {
    root: PathBuf,
}

impl DiskBackend {
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, BackendError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|err| BackendError::new(BACKEND_ID, "open", err))?;
        let backend = Self { root };
        backend.sweep().await?;
        Ok(backend)
    }

    /// Remove expired entries and orphaned temp files under the root.
    pub async fn sweep(&self) -> Result<SweepStats, BackendError> {
        let mut stats = SweepStats::default();
        let now = now_millis();
        let mut pending = vec![(self.root.clone(), 0usize)];

        while let Some((dir, depth)) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|err| BackendError::new(BACKEND_ID, "sweep", err))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|err| BackendError::new(BACKEND_ID, "sweep", err))?
            {
                let path = entry.path();
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };
                if file_type.is_dir() {
                    if depth < 2 {
                        pending.push((path, depth + 1));
                    }
                    continue;
                }

                let is_tmp = entry.file_name().to_string_lossy().contains(TMP_MARKER);
                if is_tmp {
                    if is_stale(&entry).await {
                        self.discard(&path, "orphaned").await;
                        stats.orphaned += 1;
                    }
                } else if expires_at(&path).await.is_some_and(|at| now >= at) {
                    self.discard(&path, "expired").await;
                    stats.expired += 1;
                }
            }
        }

        if stats != SweepStats::default() {
            info!(
                cache = BACKEND_ID,
                root = %self.root.display(),
                expired = stats.expired,
                orphaned = stats.orphaned,
                "swept disk cache"
            );
        }
        Ok(stats)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.root
            .join(&digest[0..2])
            .join(&digest[2..4])
            .join(&digest)
    }

    async fn discard(&self, path: &Path, reason: &'static str) {
        debug!(cache = BACKEND_ID, path = %path.display(), reason, "discarding entry");
        if let Err(err) = tokio::fs::remove_file(path).await
            && err.kind() != ErrorKind::NotFound
        {
            warn!(
                cache = BACKEND_ID,
                path = %path.display(),
                error = %err,
                "failed to remove stale cache file"
            );
        }
    }
}

/// Expiry header of an entry file; `None` when unreadable or truncated.
async fn expires_at(path: &Path) -> Option<i64> {
    let mut file = tokio::fs::File::open(path).await.ok()?;
    let mut header = [0u8; HEADER_LEN];
    file.read_exact(&mut header).await.ok()?;
    Some(i64::from_be_bytes(header))
}

async fn is_stale(entry: &tokio::fs::DirEntry) -> bool {
    let Ok(modified) = entry.metadata().await.and_then(|meta| meta.modified()) else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .is_ok_and(|age| age >= ORPHAN_TMP_AGE)
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[async_trait]
impl CacheBackend for DiskBackend {
    fn id(&self) -> &'static str {
        BACKEND_ID
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        let path = self.path_for(key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => Bytes::from(raw),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(BackendError::new(BACKEND_ID, "get", err)),
        };

        if raw.len() < HEADER_LEN {
            self.discard(&path, "truncated").await;
            return Ok(None);
        }

        let mut body = raw;
        let expires_at = body.get_i64();
        if now_millis() >= expires_at {
            self.discard(&path, "expired").await;
            return Ok(None);
        }

        Ok(Some(body))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), BackendError> {
        if ttl.is_zero() {
            return Ok(());
        }

        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| BackendError::new(BACKEND_ID, "set", err))?;
        }

        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now_millis().saturating_add(ttl_ms);

        let mut buf = BytesMut::with_capacity(HEADER_LEN + value.len());
        buf.put_i64(expires_at);
        buf.extend_from_slice(&value);

        let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
        let written = match tokio::fs::write(&tmp, &buf).await {
            Ok(()) => tokio::fs::rename(&tmp, &path).await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(BackendError::new(BACKEND_ID, "set", err));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BackendError::new(BACKEND_ID, "delete", err)),
        }
    }

    async fn flush(&self) -> Result<(), BackendError> {
        self.sweep().await.map(|_| ())
    }
}
