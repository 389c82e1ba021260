//! Cache manager: key derivation, TTL policy, negative entries and
//! single-flight population on top of a [`CacheBackend`].

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use metrics::{counter, gauge};
use tracing::{debug, warn};

use super::backend::{BackendError, CacheBackend};
use super::entry::{CacheEntry, EntryKind};
use super::flight::{Flight, InFlight};
use super::keys::CacheKey;
use super::policy::{TtlPolicy, TtlRule};
use crate::domain::RequestDescriptor;

const METRIC_CACHE_HIT_TOTAL: &str = "portico_cache_hit_total";
const METRIC_CACHE_MISS_TOTAL: &str = "portico_cache_miss_total";
const METRIC_CACHE_JOINED_TOTAL: &str = "portico_cache_joined_total";
const METRIC_CACHE_NEGATIVE_HIT_TOTAL: &str = "portico_cache_negative_hit_total";
const METRIC_CACHE_BYPASS_TOTAL: &str = "portico_cache_bypass_total";
const METRIC_CACHE_BACKEND_ERROR_TOTAL: &str = "portico_cache_backend_error_total";
const METRIC_CACHE_IN_FLIGHT: &str = "portico_cache_in_flight";

/// Failures produced by a populate function.
///
/// The manager shares one outcome between every waiter of a flight, so the
/// error has to be cloneable. Failures that confirm the resource does not
/// exist may be remembered as negative entries.
pub trait PopulateError: Clone + Send + Sync + 'static {
    /// Message to store when this failure is a confirmed absence.
    fn absence(&self) -> Option<&str>;

    /// Rebuild the failure from a negative entry.
    fn from_absence(descriptor: &RequestDescriptor, message: &str) -> Self;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Normal,
    /// Skip the read, still populate through single-flight and store.
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Joined,
    Bypass,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
            CacheStatus::Joined => "joined",
            CacheStatus::Bypass => "bypass",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub payload: Bytes,
    pub status: CacheStatus,
}

impl Fetched {
    fn new(payload: Bytes, status: CacheStatus) -> Self {
        Self { payload, status }
    }
}

pub struct CacheManager<E> {
    backend: Arc<dyn CacheBackend>,
    policy: TtlPolicy,
    prefix: String,
    flights: InFlight<Result<Bytes, E>>,
}

impl<E> Clone for CacheManager<E> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            policy: self.policy.clone(),
            prefix: self.prefix.clone(),
            flights: self.flights.clone(),
        }
    }
}

impl<E: PopulateError> CacheManager<E> {
    pub fn new(backend: Arc<dyn CacheBackend>, policy: TtlPolicy, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            policy,
            prefix: prefix.into(),
            flights: InFlight::new(),
        }
    }

    pub fn key_for(&self, descriptor: &RequestDescriptor) -> CacheKey {
        CacheKey::derive(&self.prefix, descriptor)
    }

    pub fn rule_for(&self, descriptor: &RequestDescriptor) -> TtlRule {
        self.policy.rule_for(descriptor)
    }

    pub fn backend_id(&self) -> &'static str {
        self.backend.id()
    }

    /// Number of keys currently being populated.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Return the cached outcome for `descriptor`, or run `populate` exactly
    /// once across all concurrent callers for the same key and store its
    /// result.
    pub async fn fetch_or_populate<F, Fut>(
        &self,
        descriptor: &RequestDescriptor,
        mode: CacheMode,
        populate: F,
    ) -> Result<Fetched, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
    {
        let rule = self.policy.rule_for(descriptor);
        if !rule.is_cacheable() {
            counter!(METRIC_CACHE_BYPASS_TOTAL).increment(1);
            return populate()
                .await
                .map(|payload| Fetched::new(payload, CacheStatus::Bypass));
        }

        let key = self.key_for(descriptor);
        if mode == CacheMode::Normal
            && let Some(outcome) = self.read(&key, descriptor).await
        {
            return outcome.map(|payload| Fetched::new(payload, CacheStatus::Hit));
        }

        let guard = loop {
            match self.flights.begin(key.as_str()) {
                Flight::Leader(guard) => break guard,
                Flight::Follower(waiter) => {
                    if let Some(outcome) = waiter.wait().await {
                        counter!(METRIC_CACHE_JOINED_TOTAL).increment(1);
                        return outcome.map(|payload| Fetched::new(payload, CacheStatus::Joined));
                    }
                    debug!(key = %key, "flight abandoned by its leader; contending again");
                }
            }
        };

        // Another leader may have stored the entry between our read and
        // acquiring the token.
        if mode == CacheMode::Normal
            && let Some(outcome) = self.read(&key, descriptor).await
        {
            guard.complete(outcome.clone());
            return outcome.map(|payload| Fetched::new(payload, CacheStatus::Hit));
        }

        counter!(METRIC_CACHE_MISS_TOTAL).increment(1);
        gauge!(METRIC_CACHE_IN_FLIGHT).set(self.flights.len() as f64);
        let outcome = populate().await;
        self.store(&key, rule, &outcome).await;
        guard.complete(outcome.clone());
        gauge!(METRIC_CACHE_IN_FLIGHT).set(self.flights.len() as f64);
        outcome.map(|payload| Fetched::new(payload, CacheStatus::Miss))
    }

    /// Remove the entry for `descriptor` immediately.
    pub async fn invalidate(&self, descriptor: &RequestDescriptor) -> Result<(), BackendError> {
        let key = self.key_for(descriptor);
        self.backend.delete(key.as_str()).await.inspect_err(|err| {
            counter!(METRIC_CACHE_BACKEND_ERROR_TOTAL, "op" => "delete").increment(1);
            warn!(key = %key, error = %err, "cache invalidation failed");
        })?;
        debug!(key = %key, "cache entry invalidated");
        Ok(())
    }

    pub async fn flush(&self) -> Result<(), BackendError> {
        self.backend.flush().await
    }

    /// Read and decode an entry. Backend failures and undecodable envelopes
    /// degrade to a miss.
    pub async fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        let raw = match self.backend.get(key.as_str()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                counter!(METRIC_CACHE_BACKEND_ERROR_TOTAL, "op" => "get").increment(1);
                warn!(key = %key, error = %err, "cache read failed; treating as miss");
                return None;
            }
        };

        match CacheEntry::decode(key.clone(), self.backend.id(), raw) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(key = %key, error = %err, "discarding undecodable cache entry");
                if let Err(err) = self.backend.delete(key.as_str()).await {
                    counter!(METRIC_CACHE_BACKEND_ERROR_TOTAL, "op" => "delete").increment(1);
                    warn!(key = %key, error = %err, "failed to delete undecodable cache entry");
                }
                None
            }
        }
    }

    async fn read(
        &self,
        key: &CacheKey,
        descriptor: &RequestDescriptor,
    ) -> Option<Result<Bytes, E>> {
        let entry = self.lookup(key).await?;
        counter!(METRIC_CACHE_HIT_TOTAL).increment(1);
        match entry.kind {
            EntryKind::Value => Some(Ok(entry.value)),
            EntryKind::Absent => {
                counter!(METRIC_CACHE_NEGATIVE_HIT_TOTAL).increment(1);
                let message = String::from_utf8_lossy(&entry.value);
                Some(Err(E::from_absence(descriptor, &message)))
            }
        }
    }

    async fn store(&self, key: &CacheKey, rule: TtlRule, outcome: &Result<Bytes, E>) {
        let backend_id = self.backend.id();
        let entry = match outcome {
            Ok(payload) => CacheEntry::new(
                key.clone(),
                EntryKind::Value,
                payload.clone(),
                rule.ttl,
                backend_id,
            ),
            Err(err) => match err.absence() {
                Some(message) if rule.caches_absence() => CacheEntry::new(
                    key.clone(),
                    EntryKind::Absent,
                    Bytes::copy_from_slice(message.as_bytes()),
                    rule.negative_ttl,
                    backend_id,
                ),
                _ => return,
            },
        };

        if let Err(err) = self.backend.set(key.as_str(), entry.encode(), entry.ttl).await {
            counter!(METRIC_CACHE_BACKEND_ERROR_TOTAL, "op" => "set").increment(1);
            warn!(key = %key, error = %err, "cache write failed; serving uncached result");
        }
    }
}
