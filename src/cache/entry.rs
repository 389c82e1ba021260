//! Cache entries and their storage envelope.
//!
//! Backends only ever see opaque bytes. The manager wraps every payload in a
//! fixed 18-byte header so an entry read back from any backend still knows
//! what it is, when it was stored and for how long it was meant to live.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use time::OffsetDateTime;

use super::keys::CacheKey;

const ENVELOPE_VERSION: u8 = 1;
const HEADER_LEN: usize = 1 + 1 + 8 + 8;

/// Whether an entry holds a payload or a confirmed absence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Value,
    Absent,
}

impl EntryKind {
    fn tag(self) -> u8 {
        match self {
            EntryKind::Value => 0,
            EntryKind::Absent => 1,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(EntryKind::Value),
            1 => Some(EntryKind::Absent),
            _ => None,
        }
    }
}

/// A decoded cache entry.
///
/// For [`EntryKind::Absent`] the value holds the upstream's not-found message.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub kind: EntryKind,
    pub value: Bytes,
    pub stored_at: OffsetDateTime,
    pub ttl: Duration,
    pub backend_id: &'static str,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("envelope truncated: {len} bytes")]
    Truncated { len: usize },
    #[error("unsupported envelope version {0}")]
    Version(u8),
    #[error("unknown entry kind tag {0}")]
    Kind(u8),
    #[error("stored_at out of range")]
    Timestamp,
}

impl CacheEntry {
    pub fn new(
        key: CacheKey,
        kind: EntryKind,
        value: Bytes,
        ttl: Duration,
        backend_id: &'static str,
    ) -> Self {
        Self {
            key,
            kind,
            value,
            stored_at: OffsetDateTime::now_utc(),
            ttl,
            backend_id,
        }
    }

    /// Serialize header and body into the bytes a backend stores.
    pub fn encode(&self) -> Bytes {
        let stored_at_ms = (self.stored_at.unix_timestamp_nanos() / 1_000_000) as i64;
        let ttl_ms = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX);

        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.value.len());
        buf.put_u8(ENVELOPE_VERSION);
        buf.put_u8(self.kind.tag());
        buf.put_i64(stored_at_ms);
        buf.put_u64(ttl_ms);
        buf.extend_from_slice(&self.value);
        buf.freeze()
    }

    /// Parse bytes previously produced by [`CacheEntry::encode`].
    pub fn decode(
        key: CacheKey,
        backend_id: &'static str,
        mut raw: Bytes,
    ) -> Result<Self, EnvelopeError> {
        if raw.len() < HEADER_LEN {
            return Err(EnvelopeError::Truncated { len: raw.len() });
        }

        let version = raw.get_u8();
        if version != ENVELOPE_VERSION {
            return Err(EnvelopeError::Version(version));
        }
        let tag = raw.get_u8();
        let kind = EntryKind::from_tag(tag).ok_or(EnvelopeError::Kind(tag))?;
        let stored_at_ms = raw.get_i64();
        let ttl_ms = raw.get_u64();

        let stored_at =
            OffsetDateTime::from_unix_timestamp_nanos(i128::from(stored_at_ms) * 1_000_000)
                .map_err(|_| EnvelopeError::Timestamp)?;

        Ok(Self {
            key,
            kind,
            value: raw,
            stored_at,
            ttl: Duration::from_millis(ttl_ms),
            backend_id,
        })
    }
}
