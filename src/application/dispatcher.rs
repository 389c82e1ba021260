//! Request dispatch.
//!
//! The dispatcher is the only place that talks to the cache manager, the
//! provider adapters and the circuit breakers. Each request is resolved,
//! validated and checked against its provider's circuit before the cache is
//! consulted; a miss runs one upstream call under the retry policy and the
//! outcome is reported to the circuit exactly once.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::{counter, histogram};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::error::DispatchError;
use crate::{
    cache::{BackendError, CacheKey, CacheManager, CacheMode, Fetched},
    domain::RequestDescriptor,
    provider::{ProviderAdapter, ProviderRegistry, UpstreamError},
    resilience::{CircuitBreaker, HealthRegistry, HealthSnapshot, RetryPolicy},
};

const METRIC_UPSTREAM_ATTEMPT_TOTAL: &str = "portico_upstream_attempt_total";
const METRIC_UPSTREAM_FAILURE_TOTAL: &str = "portico_upstream_failure_total";
const METRIC_UPSTREAM_LATENCY_MS: &str = "portico_upstream_latency_ms";

pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Dispatcher {
    registry: ProviderRegistry,
    cache: CacheManager<DispatchError>,
    health: HealthRegistry,
    retry: RetryPolicy,
    attempt_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: ProviderRegistry,
        cache: CacheManager<DispatchError>,
        health: HealthRegistry,
        retry: RetryPolicy,
    ) -> Self {
        let health = health.with_providers(&registry.ids());
        Self {
            registry,
            cache,
            health,
            retry,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    /// Deadline for a single upstream invocation.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub async fn handle(&self, descriptor: &RequestDescriptor) -> Result<Fetched, DispatchError> {
        self.handle_with(descriptor, CacheMode::Normal).await
    }

    #[instrument(skip(self), fields(request = %descriptor))]
    pub async fn handle_with(
        &self,
        descriptor: &RequestDescriptor,
        mode: CacheMode,
    ) -> Result<Fetched, DispatchError> {
        let adapter = Arc::clone(self.registry.resolve(descriptor.provider())?);
        adapter.validate(descriptor.endpoint(), descriptor.params())?;
        let descriptor = if adapter.varies_by_language() {
            Cow::Borrowed(descriptor)
        } else {
            descriptor.without_language()
        };
        let descriptor = &*descriptor;

        let breaker = self.health.breaker(descriptor.provider());
        breaker.check()?;

        let fetched = self
            .cache
            .fetch_or_populate(descriptor, mode, || {
                self.populate(adapter.as_ref(), &breaker, descriptor)
            })
            .await?;
        debug!(cache = fetched.status.as_str(), bytes = fetched.payload.len(), "dispatched");
        Ok(fetched)
    }

    /// Drop the cached entry for `descriptor`.
    pub async fn invalidate(&self, descriptor: &RequestDescriptor) -> Result<(), DispatchError> {
        let adapter = self.registry.resolve(descriptor.provider())?;
        if adapter.varies_by_language() {
            self.cache.invalidate(descriptor).await?;
        } else {
            self.cache.invalidate(&descriptor.without_language()).await?;
        }
        Ok(())
    }

    pub fn health(&self) -> Vec<HealthSnapshot> {
        self.health.snapshot()
    }

    pub fn key_for(&self, descriptor: &RequestDescriptor) -> CacheKey {
        self.cache.key_for(descriptor)
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Flush the cache backend; called once on shutdown.
    pub async fn flush(&self) -> Result<(), BackendError> {
        self.cache.flush().await
    }

    /// One logical upstream request: circuit permit, retries, one report.
    async fn populate(
        &self,
        adapter: &dyn ProviderAdapter,
        breaker: &Arc<CircuitBreaker>,
        descriptor: &RequestDescriptor,
    ) -> Result<Bytes, DispatchError> {
        let permit = breaker.acquire()?;

        let result = self
            .retry
            .run(|attempt| self.attempt(adapter, descriptor, attempt))
            .await;

        match &result {
            Ok(_) => permit.success(),
            Err(err) if !err.counts_against_health() => permit.success(),
            Err(err) => {
                warn!(
                    provider = %descriptor.provider(),
                    kind = %err.kind,
                    error = %err.message,
                    trial = permit.is_trial(),
                    "upstream request failed"
                );
                permit.failure();
            }
        }

        result.map_err(|err| DispatchError::upstream(descriptor.provider(), err))
    }

    async fn attempt(
        &self,
        adapter: &dyn ProviderAdapter,
        descriptor: &RequestDescriptor,
        attempt: u32,
    ) -> Result<Bytes, UpstreamError> {
        let provider = descriptor.provider().to_string();
        counter!(METRIC_UPSTREAM_ATTEMPT_TOTAL, "provider" => provider.clone()).increment(1);

        let started = Instant::now();
        let invocation = adapter.invoke(
            descriptor.endpoint(),
            descriptor.params(),
            descriptor.language(),
        );
        let outcome = match tokio::time::timeout(self.attempt_timeout, invocation).await {
            Ok(outcome) => outcome,
            Err(_) => Err(UpstreamError::timeout(format!(
                "no response within {}ms",
                self.attempt_timeout.as_millis()
            ))),
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_UPSTREAM_LATENCY_MS, "provider" => provider.clone()).record(elapsed_ms);

        if let Err(err) = &outcome {
            counter!(
                METRIC_UPSTREAM_FAILURE_TOTAL,
                "provider" => provider,
                "kind" => err.kind.as_str()
            )
            .increment(1);
            debug!(attempt, kind = %err.kind, retryable = err.retryable, "upstream attempt failed");
        }
        outcome
    }
}
